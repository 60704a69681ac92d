use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides the state root directory.
pub const ROOT_ENV: &str = "JQS_ROOT";

#[derive(Debug, Clone)]
pub struct JqsConfig {
    /// State root. Everything jqs persists lives under this directory.
    pub root: PathBuf,
    /// Scheduler tick period.
    pub tick: Duration,
    /// Grace window between the polite stop signal and the forced kill.
    pub kill_grace: Duration,
}

impl Default for JqsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            tick: Duration::from_secs(1),
            kill_grace: Duration::from_secs(10),
        }
    }
}

impl JqsConfig {
    /// Resolve the root directory: explicit flag beats `JQS_ROOT` beats
    /// `$HOME/jqs`.
    pub fn resolve(root_flag: Option<PathBuf>) -> Self {
        let root = root_flag
            .or_else(|| std::env::var_os(ROOT_ENV).map(PathBuf::from))
            .unwrap_or_else(default_root);
        Self {
            root,
            ..Default::default()
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

fn default_root() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join("jqs"),
        None => PathBuf::from("/tmp/jqs"),
    }
}
