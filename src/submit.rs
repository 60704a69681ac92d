use std::path::{Path, PathBuf};

use crate::directive;
use crate::error::Result;
use crate::store::{JobRecord, JobState, StateStore};

const DEFAULT_CORES: u32 = 1;
const DEFAULT_MEM_MB: u64 = 512;
const DEFAULT_STDOUT: &str = "stdout.log";
const DEFAULT_STDERR: &str = "stderr.log";

/// Parse the script's directives, assign a jobid and enqueue the record.
/// Nothing is written if the directives are rejected.
pub fn submit(store: &StateStore, script: &Path) -> Result<JobRecord> {
    let script_path = std::fs::canonicalize(script)?;
    let directives = directive::parse_file(&script_path)?;

    let name = directives.name.unwrap_or_else(|| {
        script_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "job".to_string())
    });

    let cwd = std::env::current_dir()?;
    let workdir = match directives.workdir {
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => cwd.join(dir),
        None => cwd,
    };

    let jobid = store.new_jobid()?;
    let stdout_path = output_path(
        directives.stdout.as_deref().unwrap_or(DEFAULT_STDOUT),
        &name,
        jobid,
        &workdir,
    );
    let stderr_path = output_path(
        directives.stderr.as_deref().unwrap_or(DEFAULT_STDERR),
        &name,
        jobid,
        &workdir,
    );

    let record = JobRecord {
        jobid,
        name,
        script_path,
        workdir,
        cores: directives.cores.unwrap_or(DEFAULT_CORES),
        mem_mb: directives.mem_mb.unwrap_or(DEFAULT_MEM_MB),
        stdout_path,
        stderr_path,
        time_limit_sec: directives.time_limit_sec,
        state: JobState::Queued,
        submit_time: chrono::Utc::now().timestamp(),
        start_time: None,
        end_time: None,
        supervisor_handle: None,
        exit_code: None,
        cancel_requested: false,
        reason: None,
    };

    store.enqueue(&record)?;
    tracing::debug!(jobid, name = %record.name, "job enqueued");
    Ok(record)
}

/// Expand `%x` (job name) and `%j` (jobid) and anchor relative paths in
/// the workdir. The final paths are fixed into the record at submission.
fn output_path(template: &str, name: &str, jobid: u64, workdir: &Path) -> PathBuf {
    let expanded = template
        .replace("%x", name)
        .replace("%j", &jobid.to_string());
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        workdir.join(path)
    }
}
