use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::lock::FileLock;
use crate::store::paths::{write_atomic, RootLayout};

/// Node-wide budgets, persisted in `limits.json`. Re-read at every
/// admission pass so edits take effect without a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub cores_total: u32,
    pub mem_mb_total: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            cores_total: 16,
            mem_mb_total: 65536,
        }
    }
}

/// Resources currently reserved by running jobs, persisted in `usage.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub cores_used: u32,
    pub mem_mb_used: u64,
}

/// What a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    pub cores: u32,
    pub mem_mb: u64,
}

/// Proof that `resources.lock` is held. Accountant mutations take it by
/// reference so the compiler enforces the locking discipline; the scheduler
/// keeps one guard across its check-reserve-move critical section.
#[derive(Debug)]
pub struct ResourceGuard {
    _lock: FileLock,
}

/// Tracks total vs in-use cores and memory and gates admission.
#[derive(Debug, Clone)]
pub struct Accountant {
    layout: RootLayout,
}

impl Accountant {
    /// Open the accountant, seeding `limits.json` and `usage.json` with
    /// defaults on first use. A present but unreadable `limits.json` is an
    /// error the caller treats as fatal.
    pub fn open(layout: RootLayout) -> Result<Self> {
        let accountant = Self { layout };
        if !accountant.layout.limits_file().exists() {
            accountant.write_limits(&Limits::default())?;
        }
        if !accountant.layout.usage_file().exists() {
            accountant.write_usage(&Usage::default())?;
        }
        // Fail now rather than on the first tick.
        accountant.limits()?;
        accountant.usage()?;
        Ok(accountant)
    }

    /// Acquire `resources.lock`. Blocks until granted.
    pub fn lock(&self) -> Result<ResourceGuard> {
        Ok(ResourceGuard {
            _lock: FileLock::acquire(&self.layout.resources_lock())?,
        })
    }

    /// Lock-free read of the limits. CLI inspection accepts the race.
    pub fn limits(&self) -> Result<Limits> {
        let text = std::fs::read_to_string(self.layout.limits_file())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Lock-free read of the usage.
    pub fn usage(&self) -> Result<Usage> {
        let text = std::fs::read_to_string(self.layout.usage_file())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// A request larger than the node can ever satisfy.
    pub fn oversized(limits: &Limits, req: &ResourceRequest) -> bool {
        req.cores > limits.cores_total || req.mem_mb > limits.mem_mb_total
    }

    /// Would `req` fit within the current free budget?
    pub fn fits(&self, _guard: &ResourceGuard, req: &ResourceRequest) -> Result<bool> {
        let limits = self.limits()?;
        let usage = self.usage()?;
        Ok(usage.cores_used + req.cores <= limits.cores_total
            && usage.mem_mb_used + req.mem_mb <= limits.mem_mb_total)
    }

    /// Add `req` to the in-use totals. Caller must have checked `fits`
    /// under the same guard.
    pub fn reserve(&self, _guard: &ResourceGuard, req: &ResourceRequest) -> Result<()> {
        let mut usage = self.usage()?;
        usage.cores_used += req.cores;
        usage.mem_mb_used += req.mem_mb;
        self.write_usage(&usage)
    }

    /// Subtract `req` from the in-use totals, saturating at zero. Going
    /// negative means an earlier accounting bug; warn and clamp.
    pub fn release(&self, _guard: &ResourceGuard, req: &ResourceRequest) -> Result<()> {
        let mut usage = self.usage()?;
        if req.cores > usage.cores_used || req.mem_mb > usage.mem_mb_used {
            tracing::warn!(
                release_cores = req.cores,
                release_mem_mb = req.mem_mb,
                cores_used = usage.cores_used,
                mem_mb_used = usage.mem_mb_used,
                "release would drive usage negative; clamping to zero"
            );
        }
        usage.cores_used = usage.cores_used.saturating_sub(req.cores);
        usage.mem_mb_used = usage.mem_mb_used.saturating_sub(req.mem_mb);
        self.write_usage(&usage)
    }

    /// Overwrite the usage wholesale. Used by the restart recovery pass to
    /// resynchronize `usage.json` with the surviving `running/` records.
    pub fn set_usage(&self, _guard: &ResourceGuard, usage: Usage) -> Result<()> {
        self.write_usage(&usage)
    }

    fn write_limits(&self, limits: &Limits) -> Result<()> {
        let mut text = serde_json::to_string_pretty(limits)?;
        text.push('\n');
        write_atomic(&self.layout.limits_file(), text.as_bytes())
    }

    fn write_usage(&self, usage: &Usage) -> Result<()> {
        let mut text = serde_json::to_string_pretty(usage)?;
        text.push('\n');
        write_atomic(&self.layout.usage_file(), text.as_bytes())
    }
}
