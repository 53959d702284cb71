use std::fs;

use tracing::{debug, info, warn};

use crate::chunk::{self, ChunkWriter, RandomChunkWriter};
use crate::config::WriteJobConfig;
use crate::error::JobError;
use crate::status::{StatusSnapshot, StatusWriter, Terminal};

/// Outcome of one worker run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerReport {
    pub terminal: Terminal,
    /// Highest chunk index in the directory when the run ended.
    pub file_count: u64,
    /// Chunk attempts made by this run, failed ones included.
    pub chunks_attempted: u64,
    pub errors: u64,
    pub size_bytes: u64,
}

/// The write loop. Owns the mutable run state and is the only writer of
/// chunk files and `status.txt` while it runs.
pub struct Worker<W = RandomChunkWriter> {
    config: WriteJobConfig,
    writer: W,
    status: StatusWriter,
    file_counter: u64,
    current_size_bytes: u64,
    chunks_attempted: u64,
    errors: u64,
}

impl Worker<RandomChunkWriter> {
    pub fn new(config: WriteJobConfig) -> Self {
        Self::with_writer(config, RandomChunkWriter::default())
    }
}

impl<W: ChunkWriter> Worker<W> {
    pub fn with_writer(config: WriteJobConfig, writer: W) -> Self {
        let status = StatusWriter::new(&config.work_dir);
        Self {
            config,
            writer,
            status,
            file_counter: 0,
            current_size_bytes: 0,
            chunks_attempted: 0,
            errors: 0,
        }
    }

    /// Write chunks until the directory reaches the target size or a stop
    /// marker shows up. Chunk failures never end the run.
    ///
    /// The stop marker is only honored once this run has attempted at least
    /// one chunk, so a stop racing the start still yields one chunk.
    pub fn run(mut self) -> Result<WorkerReport, JobError> {
        self.config.validate()?;
        fs::create_dir_all(&self.config.work_dir)?;

        self.file_counter = chunk::highest_chunk_index(&self.config.work_dir);
        info!(
            "worker {} started in {}: target {} bytes, chunk {} bytes, resuming after chunk {}",
            self.config.run_id,
            self.config.work_dir.display(),
            self.config.target_size_bytes,
            self.config.chunk_size_bytes,
            self.file_counter
        );

        let stop_path = self.config.stop_path();
        let terminal = loop {
            self.current_size_bytes = chunk::dir_size_bytes(&self.config.work_dir);
            if self.current_size_bytes as f64 >= self.config.target_size_bytes {
                break Terminal::Done;
            }
            if self.chunks_attempted > 0 && stop_path.exists() {
                break Terminal::Stopped;
            }

            self.write_next_chunk();
            self.current_size_bytes = chunk::dir_size_bytes(&self.config.work_dir);
            self.publish(Terminal::None);
        };

        self.publish(terminal);
        info!(
            "worker {} finished ({terminal}): {} bytes, {} chunks attempted, {} errors",
            self.config.run_id, self.current_size_bytes, self.chunks_attempted, self.errors
        );
        Ok(self.report(terminal))
    }

    fn write_next_chunk(&mut self) {
        self.file_counter += 1;
        self.chunks_attempted += 1;
        let path = chunk::chunk_path(&self.config.work_dir, self.file_counter);
        match self
            .writer
            .write_chunk(&path, self.config.chunk_size_bytes)
        {
            Ok(()) => debug!("wrote {}", path.display()),
            Err(e) => {
                self.errors += 1;
                warn!("Failed to write {}: {e}, continuing", path.display());
            }
        }
    }

    fn snapshot(&self, terminal: Terminal) -> StatusSnapshot {
        StatusSnapshot {
            size_gb: chunk::bytes_to_gb(self.current_size_bytes),
            file_count: self.file_counter,
            errors: self.errors,
            run_id: Some(self.config.run_id.clone()),
            terminal,
        }
    }

    fn publish(&mut self, terminal: Terminal) {
        let snapshot = self.snapshot(terminal);
        if let Err(e) = self.status.publish(&snapshot) {
            warn!(
                "Failed to write status to {}: {e}",
                self.status.path().display()
            );
        }
    }

    fn report(&self, terminal: Terminal) -> WorkerReport {
        WorkerReport {
            terminal,
            file_count: self.file_counter,
            chunks_attempted: self.chunks_attempted,
            errors: self.errors,
            size_bytes: self.current_size_bytes,
        }
    }
}

/// Run the write loop for `config` with random chunk content.
pub fn run_worker(config: WriteJobConfig) -> Result<WorkerReport, JobError> {
    Worker::new(config).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MIB, STATUS_FILE, STOP_FILE};
    use crate::status::{Status, poll_status};
    use std::io;
    use std::path::Path;

    const KIB: u64 = 1024;

    fn config(dir: &Path, target: f64, chunk: u64) -> WriteJobConfig {
        WriteJobConfig::new(target, chunk, dir)
    }

    fn chunk_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| chunk::parse_chunk_index(n).is_some())
            .collect();
        names.sort_by_key(|n| chunk::parse_chunk_index(n));
        names
    }

    /// Writes zero bytes cheaply and drops the stop marker after `stop_after` chunks.
    struct StoppingWriter {
        written: u64,
        stop_after: u64,
    }

    impl ChunkWriter for StoppingWriter {
        fn write_chunk(&mut self, path: &Path, size: u64) -> io::Result<()> {
            fs::write(path, vec![b'z'; size as usize])?;
            self.written += 1;
            if self.written == self.stop_after {
                fs::write(path.parent().unwrap().join(STOP_FILE), b"stop")?;
            }
            Ok(())
        }
    }

    /// Fails every attempt whose 1-based position is listed, after writing half the chunk.
    struct FlakyWriter {
        attempt: u64,
        fail_on: Vec<u64>,
    }

    impl ChunkWriter for FlakyWriter {
        fn write_chunk(&mut self, path: &Path, size: u64) -> io::Result<()> {
            self.attempt += 1;
            if self.fail_on.contains(&self.attempt) {
                fs::write(path, vec![b'h'; (size / 2) as usize])?;
                return Err(io::Error::other("disk on fire"));
            }
            fs::write(path, vec![b'k'; size as usize])
        }
    }

    #[test]
    fn test_three_mib_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), (3 * MIB) as f64, MIB);
        let report = Worker::with_writer(cfg.clone(), RandomChunkWriter::with_sub_chunk(256 * 1024))
            .run()
            .unwrap();

        assert_eq!(report.terminal, Terminal::Done);
        assert_eq!(report.file_count, 3);
        assert_eq!(report.errors, 0);
        assert_eq!(
            chunk_names(dir.path()),
            vec!["data_chunk_1.dat", "data_chunk_2.dat", "data_chunk_3.dat"]
        );

        let Status::Reported(snapshot) = poll_status(dir.path()) else {
            panic!("status file missing");
        };
        assert_eq!(snapshot.terminal, Terminal::Done);
        assert_eq!(snapshot.file_count, 3);
        assert_eq!(snapshot.run_id.as_deref(), Some(cfg.run_id.as_str()));
        assert!((snapshot.size_gb - 0.00293).abs() < 0.00001);
    }

    #[test]
    fn test_final_size_within_one_chunk_of_target() {
        for (target, chunk_size) in [(1.0, 4 * KIB), (10_000.0, 4 * KIB), (64.0 * KIB as f64, 3 * KIB)] {
            let dir = tempfile::tempdir().unwrap();
            let cfg = config(dir.path(), target, chunk_size);
            let report = Worker::with_writer(cfg, FlakyWriter { attempt: 0, fail_on: vec![] })
                .run()
                .unwrap();
            let size = chunk::dir_size_bytes(dir.path()) as f64;
            assert_eq!(report.terminal, Terminal::Done);
            assert!(size >= target, "{size} < {target}");
            assert!(size < target + chunk_size as f64, "{size} overshoots {target}");
            assert!(report.file_count >= 1);
        }
    }

    #[test]
    fn test_leftover_status_file_does_not_count_toward_target() {
        let dir = tempfile::tempdir().unwrap();
        // a status file far larger than the target itself
        fs::write(dir.path().join(STATUS_FILE), vec![b's'; 64 * KIB as usize]).unwrap();
        let cfg = config(dir.path(), (4 * KIB) as f64, KIB);
        let report = Worker::with_writer(cfg, FlakyWriter { attempt: 0, fail_on: vec![] })
            .run()
            .unwrap();

        assert_eq!(report.terminal, Terminal::Done);
        assert_eq!(report.chunks_attempted, 4);
        assert_eq!(report.size_bytes, 4 * KIB);
        assert_eq!(chunk_names(dir.path()).len(), 4);
    }

    #[test]
    fn test_resumes_numbering() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=5 {
            fs::write(chunk::chunk_path(dir.path(), i), b"old").unwrap();
        }
        let cfg = config(dir.path(), 15.0 + KIB as f64 / 2.0, KIB);
        let report = Worker::with_writer(cfg, FlakyWriter { attempt: 0, fail_on: vec![] })
            .run()
            .unwrap();
        assert_eq!(report.chunks_attempted, 1);
        assert_eq!(report.file_count, 6);
        assert!(chunk::chunk_path(dir.path(), 6).exists());
        assert_eq!(fs::read(chunk::chunk_path(dir.path(), 1)).unwrap(), b"old");
    }

    #[test]
    fn test_stop_after_k_chunks() {
        for k in 1..=3 {
            let dir = tempfile::tempdir().unwrap();
            let cfg = config(dir.path(), (100 * KIB) as f64, KIB);
            let report = Worker::with_writer(cfg, StoppingWriter { written: 0, stop_after: k })
                .run()
                .unwrap();
            assert_eq!(report.terminal, Terminal::Stopped);
            assert_eq!(report.chunks_attempted, k);
            assert_eq!(chunk_names(dir.path()).len() as u64, k);
            assert!(dir.path().join(STOP_FILE).exists());
        }
    }

    #[test]
    fn test_marker_before_start_still_writes_one_chunk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STOP_FILE), b"").unwrap();
        let cfg = config(dir.path(), (3 * MIB) as f64, MIB);
        let report = Worker::with_writer(cfg, RandomChunkWriter::with_sub_chunk(512 * 1024))
            .run()
            .unwrap();

        assert_eq!(report.terminal, Terminal::Stopped);
        assert_eq!(report.file_count, 1);
        let snapshot = poll_status(dir.path()).snapshot().cloned().unwrap();
        assert_eq!(snapshot.terminal, Terminal::Stopped);
        assert_eq!(snapshot.file_count, 1);
    }

    #[test]
    fn test_already_full_directory_is_done_immediately() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("existing.bin"), vec![0u8; 2048]).unwrap();
        let cfg = config(dir.path(), 1024.0, KIB);
        let report = run_worker(cfg).unwrap();
        assert_eq!(report.terminal, Terminal::Done);
        assert_eq!(report.chunks_attempted, 0);
        assert_eq!(report.file_count, 0);
    }

    #[test]
    fn test_failed_chunks_are_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), (4 * KIB) as f64, KIB);
        let report = Worker::with_writer(cfg, FlakyWriter { attempt: 0, fail_on: vec![2, 3] })
            .run()
            .unwrap();

        assert_eq!(report.terminal, Terminal::Done);
        assert_eq!(report.errors, 2);
        // the two half-written chunks stay in place and count towards the size
        assert!(chunk::chunk_path(dir.path(), 2).exists());
        assert_eq!(
            fs::metadata(chunk::chunk_path(dir.path(), 2)).unwrap().len(),
            KIB / 2
        );
        assert!(chunk::dir_size_bytes(dir.path()) as f64 >= (4 * KIB) as f64);
        let snapshot = poll_status(dir.path()).snapshot().cloned().unwrap();
        assert_eq!(snapshot.errors, 2);
        assert_eq!(snapshot.file_count, report.file_count);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 0.0, KIB);
        assert!(matches!(run_worker(cfg), Err(JobError::InvalidConfig(_))));
        assert_eq!(poll_status(dir.path()), Status::NotStarted);
    }
}
