use std::io;
use std::path::Path;

/// What a catalog-kind directory looks like before a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Missing,
    Empty,
    Populated,
}

impl DirState {
    /// Missing and empty directories both start a fresh sync.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Missing | Self::Empty)
    }
}

/// Inspect `path` without modifying it.
pub fn probe(path: &Path) -> io::Result<DirState> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => match entries.next() {
            None => Ok(DirState::Empty),
            Some(entry) => entry.map(|_| DirState::Populated),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(DirState::Missing),
        Err(e) => Err(e),
    }
}
