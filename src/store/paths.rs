use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory a job record currently lives in. The directory is the
/// authoritative coarse state; the record's `state` field must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDir {
    Queue,
    Running,
    Finished,
}

impl JobDir {
    pub fn dirname(self) -> &'static str {
        match self {
            JobDir::Queue => "queue",
            JobDir::Running => "running",
            JobDir::Finished => "finished",
        }
    }

    /// Lookup order for `find`: a job is most interesting while running.
    pub const FIND_ORDER: [JobDir; 3] = [JobDir::Running, JobDir::Queue, JobDir::Finished];
}

impl std::fmt::Display for JobDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.dirname())
    }
}

/// The on-disk layout under the jqs root.
#[derive(Debug, Clone)]
pub struct RootLayout {
    root: PathBuf,
}

impl RootLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree and the lock files if missing.
    pub fn ensure(&self) -> Result<()> {
        for dir in [JobDir::Queue, JobDir::Running, JobDir::Finished] {
            fs::create_dir_all(self.job_dir(dir))?;
        }
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, dir: JobDir) -> PathBuf {
        self.root.join(dir.dirname())
    }

    /// `<root>/<dir>/<00000042>.job`
    pub fn record_path(&self, dir: JobDir, jobid: u64) -> PathBuf {
        self.job_dir(dir).join(record_filename(jobid))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn resources_lock(&self) -> PathBuf {
        self.locks_dir().join("resources.lock")
    }

    pub fn jobid_lock(&self) -> PathBuf {
        self.locks_dir().join("jobid.lock")
    }

    pub fn limits_file(&self) -> PathBuf {
        self.root.join("limits.json")
    }

    pub fn usage_file(&self) -> PathBuf {
        self.root.join("usage.json")
    }

    pub fn jobid_counter(&self) -> PathBuf {
        self.root.join("jobid_counter")
    }
}

/// Zero-padded so lexical directory order is submission order.
pub fn record_filename(jobid: u64) -> String {
    format!("{jobid:08}.job")
}

/// Parse a jobid back out of a record filename. Returns `None` for
/// anything that is not a `<digits>.job` name (including `.tmp` leftovers).
pub fn parse_record_filename(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".job")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Write bytes to `<path>.tmp`, flush to disk, then rename over `path`.
/// Readers see either the old content or the new, never a truncated file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        use std::io::Write;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
