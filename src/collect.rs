/// Forced-collection capability used to reset the measurement baseline
/// before each benchmark phase.
///
/// There is no garbage collector to force, so the closest host capability is
/// asking the allocator to hand free pages back to the OS. Where the
/// allocator offers no such call the capability is unavailable.
use std::fmt;

/// Reported when a collector cannot run on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectError {
    pub collector: &'static str,
    pub reason: &'static str,
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "forced collection unavailable ({}): {}",
            self.collector, self.reason
        )
    }
}

impl std::error::Error for CollectError {}

/// A best-effort full collection cycle.
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one collection. Returns whether anything was released.
    fn collect(&self) -> Result<bool, CollectError>;
}

/// Trims the glibc heap with `malloc_trim(0)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapTrimCollector;

impl Collector for HeapTrimCollector {
    fn name(&self) -> &'static str {
        "malloc_trim"
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn collect(&self) -> Result<bool, CollectError> {
        // SAFETY: malloc_trim only walks allocator-owned free lists.
        let released = unsafe { libc::malloc_trim(0) };
        Ok(released == 1)
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn collect(&self) -> Result<bool, CollectError> {
        Err(CollectError {
            collector: self.name(),
            reason: "allocator has no trim entry point on this target",
        })
    }
}

/// Run a collection before a phase. A missing capability is returned as an
/// error when `required`, otherwise logged and skipped.
pub fn reset_baseline(collector: &dyn Collector, required: bool) -> Result<(), CollectError> {
    match collector.collect() {
        Ok(released) => {
            tracing::debug!(collector = collector.name(), released, "forced collection done");
            Ok(())
        }
        Err(e) if required => Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "continuing without forced collection");
            Ok(())
        }
    }
}
