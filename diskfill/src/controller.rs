use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use base64::{Engine, engine::general_purpose};
use tracing::{debug, info, trace, warn};

use crate::chunk;
use crate::config::{self, CLEAR_GRACE, WriteJobConfig};
use crate::error::JobError;
use crate::status::{self, StatusSnapshot, Terminal};
use crate::worker::{WorkerReport, run_worker};

/// Execution context a worker runs in, as seen from the controller.
pub trait WorkerContext: Send {
    /// Whether the worker is still running. Reaps the worker once it is gone.
    fn is_alive(&mut self) -> bool;
}

/// Starts a worker for a job.
pub trait Launcher {
    fn launch(&self, config: &WriteJobConfig) -> Result<Box<dyn WorkerContext>, JobError>;
}

/// Runs each worker as a child process of `program`, through its hidden
/// `worker` subcommand.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn current_exe() -> Result<Self, JobError> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

/// Serialize a job config for the `worker --config-base64` argument.
pub fn encode_worker_config(config: &WriteJobConfig) -> Result<String, JobError> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| JobError::InvalidConfig(format!("failed to serialize config: {e}")))?;
    Ok(general_purpose::STANDARD.encode(config_json))
}

pub fn decode_worker_config(config_base64: &str) -> Result<WriteJobConfig, JobError> {
    let config_json = general_purpose::STANDARD
        .decode(config_base64)
        .map_err(|e| JobError::InvalidConfig(format!("failed to decode base64 config: {e}")))?;
    serde_json::from_slice(&config_json)
        .map_err(|e| JobError::InvalidConfig(format!("failed to parse config from json: {e}")))
}

struct ProcessWorker {
    child: Child,
}

impl WorkerContext for ProcessWorker {
    fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    warn!("Worker process {} exited with {status}", self.child.id());
                }
                false
            }
            Err(e) => {
                warn!("Failed to query worker process {}: {e}", self.child.id());
                false
            }
        }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, config: &WriteJobConfig) -> Result<Box<dyn WorkerContext>, JobError> {
        let config_base64 = encode_worker_config(config)?;
        let mut command = Command::new(&self.program);
        command
            .arg("worker")
            .arg("--config-base64")
            .arg(&config_base64)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        // keep terminal signals away from the worker, it only stops through the marker
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let child = command.spawn().map_err(JobError::Spawn)?;
        debug!("spawned worker process {}", child.id());
        Ok(Box::new(ProcessWorker { child }))
    }
}

/// Runs each worker on a dedicated thread of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLauncher;

struct ThreadWorker {
    handle: Option<JoinHandle<Result<WorkerReport, JobError>>>,
}

impl WorkerContext for ThreadWorker {
    fn is_alive(&mut self) -> bool {
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };
        if !handle.is_finished() {
            return true;
        }
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(Ok(report)) => trace!("worker thread finished: {report:?}"),
                Ok(Err(e)) => warn!("Worker thread failed: {e}"),
                Err(_) => warn!("Worker thread panicked"),
            }
        }
        false
    }
}

impl Launcher for ThreadLauncher {
    fn launch(&self, config: &WriteJobConfig) -> Result<Box<dyn WorkerContext>, JobError> {
        let config = config.clone();
        let handle = thread::Builder::new()
            .name("diskfill-worker".to_string())
            .spawn(move || run_worker(config))
            .map_err(JobError::Spawn)?;
        Ok(Box::new(ThreadWorker {
            handle: Some(handle),
        }))
    }
}

/// Returned by a successful [`Controller::start_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub work_dir: PathBuf,
    pub run_id: String,
}

/// Observable state of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    pub work_dir: PathBuf,
    pub run_id: String,
    pub target_size_bytes: f64,
    pub writing: bool,
    pub current_size_gb: f64,
    pub file_count: u64,
    pub errors: u64,
    pub terminal: Terminal,
    /// The worker went away without reporting a terminal state.
    pub implicit_stop: bool,
}

impl JobView {
    pub fn target_size_gb(&self) -> f64 {
        self.target_size_bytes / config::GIB as f64
    }

    pub fn percent(&self) -> f64 {
        let target = self.target_size_gb();
        if target > 0.0 {
            (self.current_size_gb / target * 100.0).min(100.0)
        } else {
            0.0
        }
    }
}

/// State transitions observed by [`Controller::tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Finished { work_dir: PathBuf, terminal: Terminal },
    WorkerLost { work_dir: PathBuf },
}

struct Job {
    config: WriteJobConfig,
    writing: bool,
    snapshot: StatusSnapshot,
    terminal: Terminal,
    implicit_stop: bool,
    worker: Option<Box<dyn WorkerContext>>,
}

impl Job {
    fn view(&self) -> JobView {
        JobView {
            work_dir: self.config.work_dir.clone(),
            run_id: self.config.run_id.clone(),
            target_size_bytes: self.config.target_size_bytes,
            writing: self.writing,
            current_size_gb: self.snapshot.size_gb,
            file_count: self.snapshot.file_count,
            errors: self.snapshot.errors,
            terminal: self.terminal,
            implicit_stop: self.implicit_stop,
        }
    }

    /// Fold the status file into the job. Returns whether it reported a
    /// terminal state that ended this job.
    fn absorb_status(&mut self) -> bool {
        let Some(text) = status::read_status_text(&self.config.work_dir) else {
            return false;
        };
        let decoded = self.snapshot.merged(&text);
        if decoded.run_id.as_deref() != Some(self.config.run_id.as_str()) {
            trace!(
                "ignoring status of run {:?} in {}",
                decoded.run_id,
                self.config.work_dir.display()
            );
            return false;
        }
        let terminal = decoded.terminal;
        self.snapshot = decoded;
        if terminal.is_terminal() && self.writing {
            self.writing = false;
            self.terminal = terminal;
            return true;
        }
        false
    }

    fn reconcile(&mut self) -> Option<JobEvent> {
        if self.absorb_status() {
            info!(
                "job in {} finished: {}",
                self.config.work_dir.display(),
                self.terminal
            );
            return Some(JobEvent::Finished {
                work_dir: self.config.work_dir.clone(),
                terminal: self.terminal,
            });
        }

        let alive = self.worker.as_mut().is_some_and(|w| w.is_alive());
        if !alive {
            self.worker = None;
        }
        if !self.writing || alive {
            return None;
        }

        // the worker may have written its terminal line right before exiting
        if self.absorb_status() {
            return Some(JobEvent::Finished {
                work_dir: self.config.work_dir.clone(),
                terminal: self.terminal,
            });
        }
        warn!(
            "worker for {} exited without a terminal status, treating it as stopped",
            self.config.work_dir.display()
        );
        self.writing = false;
        self.terminal = Terminal::Stopped;
        self.implicit_stop = true;
        Some(JobEvent::WorkerLost {
            work_dir: self.config.work_dir.clone(),
        })
    }
}

/// Jobs known to a controller, keyed by canonical working directory.
#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<PathBuf, Job>,
}

impl JobRegistry {
    fn get(&self, work_dir: &Path) -> Option<&Job> {
        let key = canonical(work_dir)?;
        self.jobs.get(&key)
    }

    fn get_mut(&mut self, work_dir: &Path) -> Option<&mut Job> {
        let key = canonical(work_dir)?;
        self.jobs.get_mut(&key)
    }

    pub fn is_writing(&self, work_dir: &Path) -> bool {
        self.get(work_dir).is_some_and(|job| job.writing)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn canonical(work_dir: &Path) -> Option<PathBuf> {
    work_dir.canonicalize().ok()
}

/// Starts, stops and observes write jobs. Single-threaded: all state
/// changes happen in the caller's thread, workers only touch the disk.
pub struct Controller<L = ProcessLauncher> {
    launcher: L,
    registry: JobRegistry,
}

impl<L: Launcher> Controller<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            registry: JobRegistry::default(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Spawn a worker for `config`. Rejected while a job for the same
    /// directory is still writing, or while a stop marker is left over.
    pub fn start_job(&mut self, mut config: WriteJobConfig) -> Result<JobHandle, JobError> {
        config.validate()?;
        fs::create_dir_all(&config.work_dir)?;
        let key = config.work_dir.canonicalize()?;
        config.work_dir = key.clone();

        if self.registry.is_writing(&key) {
            return Err(JobError::AlreadyActive(key));
        }
        let stop_path = config.stop_path();
        if stop_path.exists() {
            return Err(JobError::StopMarkerPresent(stop_path));
        }

        let snapshot = StatusSnapshot {
            size_gb: chunk::bytes_to_gb(chunk::dir_size_bytes(&key)),
            file_count: chunk::highest_chunk_index(&key),
            ..StatusSnapshot::default()
        };
        let worker = self.launcher.launch(&config)?;
        info!(
            "started job {} in {}: target {:.2} GB",
            config.run_id,
            key.display(),
            config.target_size_gb()
        );

        let handle = JobHandle {
            work_dir: key.clone(),
            run_id: config.run_id.clone(),
        };
        self.registry.jobs.insert(
            key,
            Job {
                config,
                writing: true,
                snapshot,
                terminal: Terminal::None,
                implicit_stop: false,
                worker: Some(worker),
            },
        );
        Ok(handle)
    }

    /// Ask the worker of `work_dir` to stop after its current chunk.
    /// Returns `false` without touching the disk if no job is writing there.
    pub fn stop_job(&mut self, work_dir: &Path) -> Result<bool, JobError> {
        match self.registry.get(work_dir) {
            Some(job) if job.writing => {
                request_stop(&job.config.work_dir)?;
                info!("stop requested for {}", job.config.work_dir.display());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Reconcile every job with its status file and worker liveness.
    pub fn tick(&mut self) -> Vec<JobEvent> {
        self.registry
            .jobs
            .values_mut()
            .filter_map(Job::reconcile)
            .collect()
    }

    pub fn job(&self, work_dir: &Path) -> Option<JobView> {
        self.registry.get(work_dir).map(Job::view)
    }

    pub fn jobs(&self) -> Vec<JobView> {
        self.registry.jobs.values().map(Job::view).collect()
    }

    pub fn any_writing(&self) -> bool {
        self.registry.jobs.values().any(|job| job.writing)
    }

    /// Stop the job of `work_dir` if needed, then delete every file in the
    /// directory and forget the job. Returns the number of files removed.
    pub fn clear(&mut self, work_dir: &Path) -> Result<usize, JobError> {
        if let Some(job) = self.registry.get_mut(work_dir) {
            if job.writing {
                request_stop(&job.config.work_dir)?;
            }
            if !wait_for_exit(job, CLEAR_GRACE) {
                return Err(JobError::AlreadyActive(job.config.work_dir.clone()));
            }
            job.writing = false;
        }
        if let Some(key) = canonical(work_dir) {
            self.registry.jobs.remove(&key);
        }
        clear_dir(work_dir)
    }
}

/// Drop the stop marker into `work_dir`.
pub fn request_stop(work_dir: &Path) -> Result<(), JobError> {
    fs::write(config::stop_path(work_dir), b"stop")?;
    Ok(())
}

fn wait_for_exit(job: &mut Job, grace: Duration) -> bool {
    let Some(worker) = job.worker.as_mut() else {
        return true;
    };
    let deadline = Instant::now() + grace;
    while worker.is_alive() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
    job.worker = None;
    true
}

/// Remove every regular file directly inside `work_dir`. Files that cannot
/// be removed are logged and skipped.
pub fn clear_dir(work_dir: &Path) -> Result<usize, JobError> {
    let entries = match fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if !entry.file_type().is_ok_and(|t| t.is_file()) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to delete {}: {e}", path.display()),
        }
    }
    info!("removed {removed} files from {}", work_dir.display());
    Ok(removed)
}
