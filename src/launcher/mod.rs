pub mod systemd;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::JobRecord;

pub use systemd::SystemdLauncher;

/// Seam between the scheduler and the OS facility that runs jobs under
/// hard resource limits. The scheduler depends only on this trait; the
/// systemd adapter is one implementation, tests supply an in-memory one.
///
/// Handles must be derivable purely from the jobid so a restarted
/// scheduler can probe units it did not launch.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// The opaque handle under which `jobid` runs (or would run).
    fn handle(&self, jobid: u64) -> String;

    /// Start the job's script under its resource limits. Returns the
    /// handle, or [`JqsError::Launch`](crate::error::JqsError::Launch).
    async fn launch(&self, record: &JobRecord) -> Result<String>;

    /// Is the unit behind `handle` still known and active?
    async fn alive(&self, handle: &str) -> Result<bool>;

    /// The unit's exit code, or `None` while it is still running. A unit
    /// that vanished before it could be sampled reports `-1`.
    async fn exit_code(&self, handle: &str) -> Result<Option<i32>>;

    /// Ask the unit to stop: graceful signal first, forced kill once
    /// `grace` has passed.
    async fn terminate(&self, handle: &str, grace: Duration) -> Result<()>;
}
