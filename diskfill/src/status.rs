//! Status snapshot exchanged between the worker and the controller.
//!
//! The snapshot lives in `status.txt` inside the working directory, one
//! field per line:
//!
//! ```text
//! VERSION:1
//! RUN:<run id>
//! SIZE:<directory size in GB>
//! FILES:<highest chunk index>
//! ERRORS:<failed chunk attempts>
//! DONE | STOPPED
//! ```
//!
//! For every keyed field the last parseable line wins, so the file may be
//! either rewritten or appended to. The terminal line is always the last one
//! the worker writes in a run. Nothing here is atomic: a reader may see a
//! torn file and must simply use whatever it can parse.

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::config;
use crate::error::JobError;

pub const WIRE_VERSION: u32 = 1;

const KEY_VERSION: &str = "VERSION";
const KEY_RUN: &str = "RUN";
const KEY_SIZE: &str = "SIZE";
const KEY_FILES: &str = "FILES";
const KEY_ERRORS: &str = "ERRORS";
const LINE_DONE: &str = "DONE";
const LINE_STOPPED: &str = "STOPPED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminal {
    #[default]
    None,
    Done,
    Stopped,
}

impl Terminal {
    pub fn is_terminal(self) -> bool {
        self != Terminal::None
    }

    fn marker(self) -> Option<&'static str> {
        match self {
            Terminal::None => None,
            Terminal::Done => Some(LINE_DONE),
            Terminal::Stopped => Some(LINE_STOPPED),
        }
    }
}

impl Display for Terminal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::None => write!(f, "running"),
            Terminal::Done => write!(f, "done"),
            Terminal::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusSnapshot {
    pub size_gb: f64,
    pub file_count: u64,
    pub errors: u64,
    pub run_id: Option<String>,
    pub terminal: Terminal,
}

impl StatusSnapshot {
    pub fn decode(text: &str) -> Self {
        Self::default().merged(text)
    }

    /// Decode `text` on top of `self`. Fields that are missing or malformed
    /// in `text` keep their current value; the terminal state is taken from
    /// `text` alone.
    pub fn merged(&self, text: &str) -> Self {
        let mut snapshot = StatusSnapshot {
            terminal: Terminal::None,
            ..self.clone()
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with(LINE_DONE) || line.starts_with(LINE_STOPPED) {
                if snapshot.terminal == Terminal::None {
                    snapshot.terminal = if line.starts_with(LINE_DONE) {
                        Terminal::Done
                    } else {
                        Terminal::Stopped
                    };
                }
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                trace!("ignoring status line without key: {line:?}");
                continue;
            };
            let value = value.trim();
            match key.trim() {
                KEY_SIZE => match value.parse::<f64>() {
                    Ok(size) if size.is_finite() && size >= 0.0 => snapshot.size_gb = size,
                    _ => trace!("ignoring malformed size {value:?}"),
                },
                KEY_FILES => match value.parse::<u64>() {
                    Ok(files) => snapshot.file_count = files,
                    Err(_) => trace!("ignoring malformed file count {value:?}"),
                },
                KEY_ERRORS => match value.parse::<u64>() {
                    Ok(errors) => snapshot.errors = errors,
                    Err(_) => trace!("ignoring malformed error count {value:?}"),
                },
                KEY_RUN if !value.is_empty() => snapshot.run_id = Some(value.to_string()),
                KEY_VERSION => {
                    if value.parse::<u32>().ok() != Some(WIRE_VERSION) {
                        trace!("status written with wire version {value:?}");
                    }
                }
                _ => trace!("ignoring unknown status line {line:?}"),
            }
        }
        snapshot
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_terminal()
    }
}

impl Display for StatusSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{KEY_VERSION}:{WIRE_VERSION}")?;
        if let Some(run_id) = &self.run_id {
            writeln!(f, "{KEY_RUN}:{run_id}")?;
        }
        writeln!(f, "{KEY_SIZE}:{}", self.size_gb)?;
        writeln!(f, "{KEY_FILES}:{}", self.file_count)?;
        writeln!(f, "{KEY_ERRORS}:{}", self.errors)?;
        if let Some(marker) = self.terminal.marker() {
            writeln!(f, "{marker}")?;
        }
        Ok(())
    }
}

/// What a poll of the working directory found.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    NotStarted,
    Reported(StatusSnapshot),
}

impl Status {
    pub fn snapshot(&self) -> Option<&StatusSnapshot> {
        match self {
            Status::NotStarted => None,
            Status::Reported(snapshot) => Some(snapshot),
        }
    }
}

/// Raw contents of the status file, `None` if it is absent or unreadable.
pub fn read_status_text(work_dir: &Path) -> Option<String> {
    fs::read(config::status_path(work_dir))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

pub fn poll_status(work_dir: &Path) -> Status {
    match read_status_text(work_dir) {
        Some(text) => Status::Reported(StatusSnapshot::decode(&text)),
        None => Status::NotStarted,
    }
}

/// Sole writer of `status.txt` for one run.
#[derive(Debug)]
pub struct StatusWriter {
    path: PathBuf,
    sealed: bool,
}

impl StatusWriter {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            path: config::status_path(work_dir),
            sealed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Overwrite the status file with `snapshot`. Publishing a terminal
    /// snapshot seals the writer.
    pub fn publish(&mut self, snapshot: &StatusSnapshot) -> Result<(), JobError> {
        if self.sealed {
            return Err(JobError::Sealed);
        }
        fs::write(&self.path, snapshot.encode())?;
        if snapshot.is_terminal() {
            self.sealed = true;
        }
        Ok(())
    }
}
