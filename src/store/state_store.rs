use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{JqsError, Result};
use crate::store::lock::FileLock;
use crate::store::paths::{parse_record_filename, write_atomic, JobDir, RootLayout};
use crate::store::record::{self, JobRecord, JobState};

/// One directory entry from a scan: the jobid from the filename and the
/// decode outcome of the body. Scheduler code handles corrupt bodies
/// per-entry instead of aborting the whole scan.
#[derive(Debug)]
pub struct ScanEntry {
    pub jobid: u64,
    pub path: PathBuf,
    pub result: Result<JobRecord>,
}

/// Filesystem-rooted job store shared by the CLI and the scheduler.
///
/// Every mutation of a record goes through write-temp-then-rename, so a
/// concurrent reader never observes a torn file. Moves between directories
/// are write-into-target then unlink-source; [`StateStore::recover`]
/// restores the one-directory invariant after a crash between the two.
#[derive(Debug, Clone)]
pub struct StateStore {
    layout: RootLayout,
}

impl StateStore {
    /// Open the store, creating the directory tree and counter on first use.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let layout = RootLayout::new(root);
        layout.ensure()?;
        let counter = layout.jobid_counter();
        if !counter.exists() {
            write_atomic(&counter, b"0")?;
        }
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    /// Allocate the next jobid under `jobid.lock`. Ids are strictly
    /// increasing across all submitters.
    pub fn new_jobid(&self) -> Result<u64> {
        let _lock = FileLock::acquire(&self.layout.jobid_lock())?;
        let counter = self.layout.jobid_counter();
        let last: u64 = match fs::read_to_string(&counter) {
            Ok(text) => text.trim().parse().unwrap_or(0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        let next = last + 1;
        write_atomic(&counter, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Write a freshly submitted record into `queue/`.
    pub fn enqueue(&self, record: &JobRecord) -> Result<()> {
        let path = self.layout.record_path(JobDir::Queue, record.jobid);
        write_atomic(&path, record::encode(record).as_bytes())
    }

    pub fn load(&self, dir: JobDir, jobid: u64) -> Result<JobRecord> {
        let path = self.layout.record_path(dir, jobid);
        self.load_path(&path, jobid)
    }

    fn load_path(&self, path: &Path, jobid: u64) -> Result<JobRecord> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(JqsError::NotFound(jobid))
            }
            Err(e) => return Err(e.into()),
        };
        record::decode(&text).map_err(|e| JqsError::CorruptRecord {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// All entries of a directory in jobid order, corrupt bodies included.
    pub fn scan(&self, dir: JobDir) -> Result<Vec<ScanEntry>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.layout.job_dir(dir))? {
            let entry = entry?;
            if let Some(jobid) = entry.file_name().to_str().and_then(parse_record_filename) {
                ids.push((jobid, entry.path()));
            }
        }
        ids.sort_by_key(|(jobid, _)| *jobid);
        Ok(ids
            .into_iter()
            .map(|(jobid, path)| {
                let result = self.load_path(&path, jobid);
                ScanEntry {
                    jobid,
                    path,
                    result,
                }
            })
            .collect())
    }

    /// Decodable records of a directory in jobid order. Used by the CLI,
    /// which has no business with corrupt files.
    pub fn list(&self, dir: JobDir) -> Result<Vec<JobRecord>> {
        Ok(self
            .scan(dir)?
            .into_iter()
            .filter_map(|e| e.result.ok())
            .collect())
    }

    /// Rewrite a record in place via temp+rename.
    pub fn update<F>(&self, dir: JobDir, jobid: u64, mutate: F) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut record = self.load(dir, jobid)?;
        mutate(&mut record);
        let path = self.layout.record_path(dir, jobid);
        write_atomic(&path, record::encode(&record).as_bytes())?;
        Ok(record)
    }

    /// Move a record between directories, applying `mutate` on the way.
    /// Write into the target first, then unlink the source; the target is
    /// authoritative if a crash leaves both behind.
    pub fn transfer<F>(&self, jobid: u64, from: JobDir, to: JobDir, mutate: F) -> Result<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut record = self.load(from, jobid)?;
        mutate(&mut record);
        let target = self.layout.record_path(to, jobid);
        write_atomic(&target, record::encode(&record).as_bytes())?;
        remove_if_exists(&self.layout.record_path(from, jobid))?;
        Ok(record)
    }

    /// Locate a job, checking `running/` then `queue/` then `finished/`.
    pub fn find(&self, jobid: u64) -> Result<(JobDir, JobRecord)> {
        for dir in JobDir::FIND_ORDER {
            match self.load(dir, jobid) {
                Ok(record) => return Ok((dir, record)),
                Err(JqsError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(JqsError::NotFound(jobid))
    }

    /// Set `cancel_requested` on a queued or running job. The scheduler
    /// honors the flag on its next tick.
    pub fn mark_cancel_requested(&self, jobid: u64) -> Result<()> {
        // The record may move queue -> running between find and update;
        // one retry covers that window.
        for attempt in 0..2 {
            let (dir, record) = self.find(jobid)?;
            if record.state.is_terminal() {
                return Err(JqsError::AlreadyTerminal(jobid));
            }
            match self.update(dir, jobid, |r| r.cancel_requested = true) {
                Ok(_) => return Ok(()),
                Err(JqsError::NotFound(_)) if attempt == 0 => continue,
                Err(e) => return Err(e),
            }
        }
        Err(JqsError::NotFound(jobid))
    }

    /// Replace an undecodable record with a terminal `FAILED` stub in
    /// `finished/`, preserving the original bytes as comment lines.
    pub fn quarantine(&self, dir: JobDir, jobid: u64, now: i64) -> Result<()> {
        let source = self.layout.record_path(dir, jobid);
        let original = fs::read_to_string(&source).unwrap_or_default();

        let stub = JobRecord {
            jobid,
            name: format!("job-{jobid}"),
            script_path: PathBuf::new(),
            workdir: PathBuf::new(),
            cores: 0,
            mem_mb: 0,
            stdout_path: PathBuf::new(),
            stderr_path: PathBuf::new(),
            time_limit_sec: None,
            state: JobState::Failed,
            submit_time: 0,
            start_time: None,
            end_time: Some(now),
            supervisor_handle: None,
            exit_code: None,
            cancel_requested: false,
            reason: Some("CorruptRecord".to_string()),
        };

        let mut body = record::encode(&stub);
        if !original.is_empty() {
            body.push_str("# original content:\n");
            for line in original.lines() {
                body.push_str("# ");
                body.push_str(line);
                body.push('\n');
            }
        }
        write_atomic(&self.layout.record_path(JobDir::Finished, jobid), body.as_bytes())?;
        remove_if_exists(&source)
    }

    /// Crash recovery: delete stale `.tmp` files, then resolve records left
    /// visible in two directories (target wins, in finished > running >
    /// queue precedence).
    pub fn recover(&self) -> Result<()> {
        for dir in [JobDir::Queue, JobDir::Running, JobDir::Finished] {
            for entry in fs::read_dir(self.layout.job_dir(dir))? {
                let entry = entry?;
                let name = entry.file_name();
                if name.to_str().is_some_and(|n| n.ends_with(".tmp")) {
                    tracing::warn!(path = %entry.path().display(), "removing stale temp file");
                    remove_if_exists(&entry.path())?;
                }
            }
        }

        let finished = self.present_ids(JobDir::Finished)?;
        let running = self.present_ids(JobDir::Running)?;
        for jobid in &finished {
            for dir in [JobDir::Running, JobDir::Queue] {
                self.drop_duplicate(dir, *jobid)?;
            }
        }
        for jobid in &running {
            if !finished.contains(jobid) {
                self.drop_duplicate(JobDir::Queue, *jobid)?;
            }
        }
        Ok(())
    }

    fn present_ids(&self, dir: JobDir) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.layout.job_dir(dir))? {
            let entry = entry?;
            if let Some(jobid) = entry.file_name().to_str().and_then(parse_record_filename) {
                ids.push(jobid);
            }
        }
        Ok(ids)
    }

    fn drop_duplicate(&self, dir: JobDir, jobid: u64) -> Result<()> {
        let path = self.layout.record_path(dir, jobid);
        if path.exists() {
            tracing::warn!(jobid, dir = %dir, "removing duplicate record left by interrupted move");
            remove_if_exists(&path)?;
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
