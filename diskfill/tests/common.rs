use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use diskfill::chunk::parse_chunk_index;

#[allow(dead_code)]
pub const KIB: u64 = 1024;

#[allow(dead_code)]
pub fn chunk_count(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| parse_chunk_index(&entry.file_name().to_string_lossy()).is_some())
        .count()
}

/// Run the diskfill binary with its config directory pointed at `config_home`.
#[allow(dead_code)]
pub fn diskfill(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_diskfill"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run diskfill")
}
