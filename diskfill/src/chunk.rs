use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use rand::{Rng, distr::Alphanumeric};
use tracing::trace;
use walkdir::WalkDir;

use crate::config::{
    CHUNK_PREFIX, CHUNK_SUFFIX, GIB, STATUS_FILE, STOP_FILE, SUB_CHUNK_BYTES,
};

pub fn chunk_file_name(index: u64) -> String {
    format!("{CHUNK_PREFIX}{index}{CHUNK_SUFFIX}")
}

pub fn chunk_path(work_dir: &Path, index: u64) -> PathBuf {
    work_dir.join(chunk_file_name(index))
}

/// Index of a `data_chunk_<N>.dat` file name.
pub fn parse_chunk_index(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(CHUNK_PREFIX)?.strip_suffix(CHUNK_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Highest chunk index present in `work_dir`, 0 if there is none.
pub fn highest_chunk_index(work_dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(work_dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| parse_chunk_index(&entry.file_name().to_string_lossy()))
        .max()
        .unwrap_or(0)
}

/// Total size of every regular file below `work_dir`, the status file and
/// stop marker excepted. Files that vanish or cannot be inspected while
/// walking are skipped.
pub fn dir_size_bytes(work_dir: &Path) -> u64 {
    WalkDir::new(work_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.depth() != 1 || !is_control_file(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn is_control_file(name: &str) -> bool {
    name == STATUS_FILE || name == STOP_FILE
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Produces the content of one chunk file.
pub trait ChunkWriter {
    fn write_chunk(&mut self, path: &Path, size: u64) -> io::Result<()>;
}

/// Fills chunks with random alphanumeric bytes, a bounded buffer at a time.
pub struct RandomChunkWriter {
    sub_chunk: usize,
    buf: Vec<u8>,
}

impl Default for RandomChunkWriter {
    fn default() -> Self {
        Self::with_sub_chunk(SUB_CHUNK_BYTES)
    }
}

impl RandomChunkWriter {
    pub fn with_sub_chunk(sub_chunk: usize) -> Self {
        Self {
            sub_chunk: sub_chunk.max(1),
            buf: Vec::new(),
        }
    }

    fn fill(&mut self, len: usize) -> &[u8] {
        let mut rng = rand::rng();
        self.buf.clear();
        self.buf.extend((0..len).map(|_| rng.sample(Alphanumeric)));
        &self.buf
    }
}

impl ChunkWriter for RandomChunkWriter {
    fn write_chunk(&mut self, path: &Path, size: u64) -> io::Result<()> {
        let mut file = File::create(path)?;
        let mut remaining = size;
        while remaining > 0 {
            let len = remaining.min(self.sub_chunk as u64) as usize;
            let data = self.fill(len);
            file.write_all(data)?;
            file.flush()?;
            remaining -= len as u64;
            trace!("{}: {remaining} bytes left", path.display());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFile {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Local>,
}

/// Chunk files of `work_dir`, oldest first, at most `limit` of them.
pub fn list_chunk_files(work_dir: &Path, limit: usize) -> io::Result<Vec<ChunkFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(work_dir)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(index) = parse_chunk_index(&name) else {
            continue;
        };
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((
            modified,
            index,
            ChunkFile {
                name,
                size_bytes: meta.len(),
                modified: DateTime::<Local>::from(modified),
            },
        ));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    Ok(files
        .into_iter()
        .take(limit)
        .map(|(_, _, file)| file)
        .collect())
}
