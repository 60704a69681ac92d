use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JqsError {
    #[error("bad directive at line {line}: {reason}")]
    BadDirective { line: usize, reason: String },

    #[error("job not found: {0}")]
    NotFound(u64),

    #[error("job {0} is already terminal")]
    AlreadyTerminal(u64),

    #[error("request exceeds node limits: {cores} cores, {mem_mb} MB")]
    OversizedRequest { cores: u32, mem_mb: u64 },

    #[error("corrupt job record {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("launcher failed: {0}")]
    Launch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JqsError {
    /// Process exit code for a CLI command that fails with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            JqsError::BadDirective { .. } => 2,
            JqsError::Io(_) => 3,
            JqsError::NotFound(_) => 4,
            JqsError::AlreadyTerminal(_) => 5,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, JqsError>;
