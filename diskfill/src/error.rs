use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid job config: {0}")]
    InvalidConfig(String),
    #[error("a write job is already active for {}", .0.display())]
    AlreadyActive(PathBuf),
    #[error(
        "stop marker {} is left over from a previous run, clear it before starting a new job",
        .0.display()
    )]
    StopMarkerPresent(PathBuf),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("status file is sealed after a terminal snapshot")]
    Sealed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
