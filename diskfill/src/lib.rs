pub mod chunk;
pub mod config;
pub mod controller;
pub mod error;
pub mod status;
pub mod watch;
pub mod worker;

// re-export selected public API
pub use chunk::{ChunkFile, list_chunk_files};
pub use config::{Settings, WriteJobConfig};
pub use controller::{
    Controller, JobEvent, JobHandle, JobView, Launcher, ProcessLauncher, ThreadLauncher,
};
pub use error::JobError;
pub use status::{Status, StatusSnapshot, Terminal, poll_status};
pub use worker::{WorkerReport, run_worker};
