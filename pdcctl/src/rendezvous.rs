//! Pick up result files dropped by the external conversion pipeline.
//!
//! A file is ready when it has the expected extension, is not empty and its
//! name no longer carries the in-progress marker. Each path is claimed at
//! most once per `Rendezvous`.

use crate::error::{Error, Result};
use crate::Abort;
use pdctools::de::{self, Samples};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Marker in the name of a file the pipeline is still writing
pub const IN_PROGRESS: &str = "CTL_XXX";

pub struct Rendezvous {
    dir: PathBuf,
    extension: String,
    interval: Duration,
    seen: HashSet<PathBuf>,
    abort: Abort,
}

/// A claimed result file, not opened yet
#[derive(Debug, PartialEq, Eq)]
pub struct PendingArtifact {
    path: PathBuf,
}

impl PendingArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self, n_pdc: usize) -> Result<Samples> {
        Ok(de::artifact(&self.path, n_pdc)?)
    }

    /// Done with the file; delete it if asked to
    pub fn release(self, delete: bool) -> Result<()> {
        if delete {
            debug!("deleting {}", self.path.display());
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Rendezvous {
    pub fn new(dir: impl Into<PathBuf>, extension: &str, interval: Duration) -> Self {
        Rendezvous {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            interval,
            seen: HashSet::new(),
            abort: Abort::default(),
        }
    }

    /// Continue from paths claimed earlier
    pub fn with_seen(mut self, seen: HashSet<PathBuf>) -> Self {
        self.seen = seen;
        return self;
    }

    pub fn with_abort(mut self, abort: Abort) -> Self {
        self.abort = abort;
        return self;
    }

    pub fn seen(&self) -> &HashSet<PathBuf> {
        &self.seen
    }

    pub fn into_seen(self) -> HashSet<PathBuf> {
        self.seen
    }

    /// Look once for the newest ready file that was not claimed yet
    pub fn poll(&mut self) -> Result<Option<PendingArtifact>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            // the pipeline creates the directory with its first file
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension() != Some(OsStr::new(&self.extension)) {
                continue;
            }
            if entry.file_name().to_string_lossy().contains(IN_PROGRESS) {
                continue;
            }
            if self.seen.contains(&path) {
                continue;
            }
            // the file may vanish between listing and stat
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !meta.is_file() || meta.len() == 0 {
                continue;
            }
            let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((mtime, path));
        }

        // newest first
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        match candidates.into_iter().next() {
            Some((_, path)) => {
                self.seen.insert(path.clone());
                debug!("claimed {}", path.display());
                Ok(Some(PendingArtifact { path }))
            }
            None => Ok(None),
        }
    }

    /// Poll until a file is ready, the timeout passes, or the operator aborts
    pub fn await_artifact(&mut self, timeout: Duration) -> Result<PendingArtifact> {
        let start = Instant::now();
        loop {
            self.abort.check()?;
            if let Some(a) = self.poll()? {
                return Ok(a);
            }
            if start.elapsed() >= timeout {
                warn!("no result in {} after {:?}", self.dir.display(), timeout);
                return Err(Error::Timeout(timeout));
            }
            std::thread::sleep(self.interval);
        }
    }
}
