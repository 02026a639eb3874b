//! Process resource introspection.
//!
//! Sampling is best-effort: when the `resource-probe` feature is off, tracking is
//! disabled in config, or the platform refuses to describe the current process,
//! callers get `None` and carry on with zero-valued metrics.

use serde::{Deserialize, Serialize};

/// One memory/CPU observation of the current process.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    /// Seconds since UNIX epoch.
    pub timestamp: f64,
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    /// CPU usage in percent of one core since the previous refresh.
    pub cpu_percent: f32,
}

/// Source of process resource samples.
pub trait ResourceProbe: Send {
    /// Whether this probe can produce samples at all.
    fn available(&self) -> bool;

    /// Take one sample, `None` when introspection is unavailable.
    fn sample(&mut self) -> Option<ResourceSample>;
}

/// Probe used when introspection is unavailable or disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

impl ResourceProbe for NoopProbe {
    fn available(&self) -> bool {
        false
    }

    fn sample(&mut self) -> Option<ResourceSample> {
        None
    }
}

#[cfg(feature = "resource-probe")]
pub use sysinfo_probe::SysinfoProbe;

#[cfg(feature = "resource-probe")]
mod sysinfo_probe {
    use sysinfo::{Pid, System};

    use super::{ResourceProbe, ResourceSample};

    /// `sysinfo`-backed probe for the current process.
    pub struct SysinfoProbe {
        system: System,
        pid: Option<Pid>,
    }

    impl std::fmt::Debug for SysinfoProbe {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SysinfoProbe").field("pid", &self.pid).finish()
        }
    }

    impl SysinfoProbe {
        pub fn new() -> Self {
            let pid = sysinfo::get_current_pid().ok();
            if pid.is_none() {
                tracing::debug!("current pid unavailable, resource sampling disabled");
            }
            Self {
                system: System::new(),
                pid,
            }
        }
    }

    impl Default for SysinfoProbe {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ResourceProbe for SysinfoProbe {
        fn available(&self) -> bool {
            self.pid.is_some()
        }

        fn sample(&mut self) -> Option<ResourceSample> {
            let pid = self.pid?;
            if !self.system.refresh_process(pid) {
                return None;
            }
            let process = self.system.process(pid)?;
            Some(ResourceSample {
                timestamp: crate::stats::now_secs(),
                memory_bytes: process.memory(),
                cpu_percent: process.cpu_usage(),
            })
        }
    }
}

/// Pick the best probe for this build and configuration.
pub fn select_probe(track_resources: bool) -> Box<dyn ResourceProbe> {
    if !track_resources {
        return Box::new(NoopProbe);
    }
    #[cfg(feature = "resource-probe")]
    {
        Box::new(SysinfoProbe::new())
    }
    #[cfg(not(feature = "resource-probe"))]
    {
        Box::new(NoopProbe)
    }
}
