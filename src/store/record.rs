use std::collections::HashMap;
use std::path::PathBuf;

use crate::store::paths::JobDir;

/// Lifecycle state of a job. `Finished`, `Cancelled` and `Failed` are
/// terminal; a terminal record is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Finished => "FINISHED",
            JobState::Cancelled => "CANCELLED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobState::Queued),
            "RUNNING" => Some(JobState::Running),
            "FINISHED" => Some(JobState::Finished),
            "CANCELLED" => Some(JobState::Cancelled),
            "FAILED" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Cancelled | JobState::Failed
        )
    }

    /// The directory a record in this state must live in.
    pub fn expected_dir(self) -> JobDir {
        match self {
            JobState::Queued => JobDir::Queue,
            JobState::Running => JobDir::Running,
            _ => JobDir::Finished,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // pad() honors width specifiers; the q table relies on that.
        f.pad(self.as_str())
    }
}

/// One job's metadata, as persisted in its `.job` file.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub jobid: u64,
    pub name: String,
    pub script_path: PathBuf,
    pub workdir: PathBuf,
    pub cores: u32,
    pub mem_mb: u64,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub time_limit_sec: Option<u64>,
    pub state: JobState,
    pub submit_time: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub supervisor_handle: Option<String>,
    pub exit_code: Option<i32>,
    pub cancel_requested: bool,
    /// Why a terminal record ended the way it did (e.g. `LaunchError`,
    /// `OrphanedOnRestart`). Absent on records written by older encoders.
    pub reason: Option<String>,
}

impl JobRecord {
    pub fn request(&self) -> crate::resources::ResourceRequest {
        crate::resources::ResourceRequest {
            cores: self.cores,
            mem_mb: self.mem_mb,
        }
    }
}

/// Decoding failure for one `.job` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for DecodeError {}

/// Encode a record as order-independent `key=value` lines. Strings are
/// double-quoted with `\"` and `\\` escapes; integers, booleans and `null`
/// are bare.
pub fn encode(record: &JobRecord) -> String {
    let mut out = String::with_capacity(512);
    push_int(&mut out, "jobid", record.jobid as i64);
    push_str(&mut out, "name", &record.name);
    push_str(&mut out, "script_path", &record.script_path.display().to_string());
    push_str(&mut out, "workdir", &record.workdir.display().to_string());
    push_int(&mut out, "cores", record.cores as i64);
    push_int(&mut out, "mem_mb", record.mem_mb as i64);
    push_str(&mut out, "stdout_path", &record.stdout_path.display().to_string());
    push_str(&mut out, "stderr_path", &record.stderr_path.display().to_string());
    push_opt_int(&mut out, "time_limit_sec", record.time_limit_sec.map(|v| v as i64));
    push_str(&mut out, "state", record.state.as_str());
    push_int(&mut out, "submit_time", record.submit_time);
    push_opt_int(&mut out, "start_time", record.start_time);
    push_opt_int(&mut out, "end_time", record.end_time);
    push_opt_str(&mut out, "supervisor_handle", record.supervisor_handle.as_deref());
    push_opt_int(&mut out, "exit_code", record.exit_code.map(|v| v as i64));
    push_bool(&mut out, "cancel_requested", record.cancel_requested);
    push_opt_str(&mut out, "reason", record.reason.as_deref());
    out
}

fn push_int(out: &mut String, key: &str, value: i64) {
    out.push_str(key);
    out.push('=');
    out.push_str(&value.to_string());
    out.push('\n');
}

fn push_bool(out: &mut String, key: &str, value: bool) {
    out.push_str(key);
    out.push('=');
    out.push_str(if value { "true" } else { "false" });
    out.push('\n');
}

fn push_str(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push('=');
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out.push('\n');
}

fn push_opt_int(out: &mut String, key: &str, value: Option<i64>) {
    match value {
        Some(v) => push_int(out, key, v),
        None => push_null(out, key),
    }
}

fn push_opt_str(out: &mut String, key: &str, value: Option<&str>) {
    match value {
        Some(v) => push_str(out, key, v),
        None => push_null(out, key),
    }
}

fn push_null(out: &mut String, key: &str) {
    out.push_str(key);
    out.push_str("=null\n");
}

/// A raw decoded value, before typing.
#[derive(Debug, Clone)]
enum RawValue {
    /// Unquoted token: integer, boolean or `null`.
    Bare(String),
    /// Double-quoted string, escapes already resolved.
    Quoted(String),
}

/// Decode a `.job` body. Blank lines and `#` comments are skipped; unknown
/// keys are retained-compatible (ignored). Missing mandatory keys or
/// ill-typed values fail.
pub fn decode(text: &str) -> Result<JobRecord, DecodeError> {
    let mut raw: HashMap<String, RawValue> = HashMap::new();

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (key, value) = trimmed.split_once('=').ok_or_else(|| DecodeError {
            line: lineno,
            reason: "expected key=value".into(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DecodeError {
                line: lineno,
                reason: "empty key".into(),
            });
        }
        let parsed = parse_value(value).map_err(|reason| DecodeError {
            line: lineno,
            reason,
        })?;
        raw.insert(key.to_string(), parsed);
    }

    let state_str = require_string(&raw, "state")?;
    let state = JobState::parse(&state_str).ok_or_else(|| DecodeError {
        line: 0,
        reason: format!("unknown state {state_str:?}"),
    })?;

    Ok(JobRecord {
        jobid: require_int(&raw, "jobid")? as u64,
        name: require_string(&raw, "name")?,
        script_path: PathBuf::from(require_string(&raw, "script_path")?),
        workdir: PathBuf::from(require_string(&raw, "workdir")?),
        cores: require_int(&raw, "cores")? as u32,
        mem_mb: require_int(&raw, "mem_mb")? as u64,
        stdout_path: PathBuf::from(require_string(&raw, "stdout_path")?),
        stderr_path: PathBuf::from(require_string(&raw, "stderr_path")?),
        time_limit_sec: optional_int(&raw, "time_limit_sec")?.map(|v| v as u64),
        state,
        submit_time: require_int(&raw, "submit_time")?,
        start_time: optional_int(&raw, "start_time")?,
        end_time: optional_int(&raw, "end_time")?,
        supervisor_handle: optional_string(&raw, "supervisor_handle")?,
        exit_code: optional_int(&raw, "exit_code")?.map(|v| v as i32),
        cancel_requested: optional_bool(&raw, "cancel_requested")?.unwrap_or(false),
        reason: optional_string(&raw, "reason")?,
    })
}

fn parse_value(value: &str) -> Result<RawValue, String> {
    let value = value.trim();
    if let Some(rest) = value.strip_prefix('"') {
        let mut out = String::with_capacity(rest.len());
        let mut chars = rest.chars();
        loop {
            match chars.next() {
                Some('\\') => match chars.next() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some(c) => return Err(format!("invalid escape \\{c}")),
                    None => return Err("dangling escape".into()),
                },
                Some('"') => {
                    let tail: String = chars.collect();
                    if !tail.trim().is_empty() {
                        return Err("trailing characters after closing quote".into());
                    }
                    return Ok(RawValue::Quoted(out));
                }
                Some(c) => out.push(c),
                None => return Err("unterminated string".into()),
            }
        }
    }
    if value.is_empty() {
        return Err("empty value".into());
    }
    Ok(RawValue::Bare(value.to_string()))
}

fn require_string(raw: &HashMap<String, RawValue>, key: &str) -> Result<String, DecodeError> {
    optional_string(raw, key)?.ok_or_else(|| missing(key))
}

fn optional_string(
    raw: &HashMap<String, RawValue>,
    key: &str,
) -> Result<Option<String>, DecodeError> {
    match raw.get(key) {
        None => Ok(None),
        Some(RawValue::Quoted(s)) => Ok(Some(s.clone())),
        Some(RawValue::Bare(s)) if s == "null" => Ok(None),
        Some(RawValue::Bare(_)) => Err(ill_typed(key, "a quoted string")),
    }
}

fn require_int(raw: &HashMap<String, RawValue>, key: &str) -> Result<i64, DecodeError> {
    optional_int(raw, key)?.ok_or_else(|| missing(key))
}

fn optional_int(raw: &HashMap<String, RawValue>, key: &str) -> Result<Option<i64>, DecodeError> {
    match raw.get(key) {
        None => Ok(None),
        Some(RawValue::Bare(s)) if s == "null" => Ok(None),
        Some(RawValue::Bare(s)) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ill_typed(key, "an integer")),
        Some(RawValue::Quoted(_)) => Err(ill_typed(key, "an integer")),
    }
}

fn optional_bool(raw: &HashMap<String, RawValue>, key: &str) -> Result<Option<bool>, DecodeError> {
    match raw.get(key) {
        None => Ok(None),
        Some(RawValue::Bare(s)) if s == "true" => Ok(Some(true)),
        Some(RawValue::Bare(s)) if s == "false" => Ok(Some(false)),
        Some(RawValue::Bare(s)) if s == "null" => Ok(None),
        Some(_) => Err(ill_typed(key, "a boolean")),
    }
}

fn missing(key: &str) -> DecodeError {
    DecodeError {
        line: 0,
        reason: format!("missing mandatory key {key:?}"),
    }
}

fn ill_typed(key: &str, expected: &str) -> DecodeError {
    DecodeError {
        line: 0,
        reason: format!("value for {key:?} is not {expected}"),
    }
}
