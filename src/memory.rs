/// Resident memory sampling for progress lines.
use crate::stopwatch::group_thousands;
use std::path::Path;

const STATM: &str = "/proc/self/statm";

/// Resident set size of this process, if the platform exposes it.
pub fn resident_bytes() -> Option<u64> {
    resident_bytes_from(Path::new(STATM))
}

fn resident_bytes_from(path: &Path) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    parse_statm_resident(&contents, page_size())
}

#[cfg(unix)]
fn page_size() -> u64 {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

#[cfg(not(unix))]
fn page_size() -> u64 {
    4096
}

/// The second field of statm is the resident page count.
fn parse_statm_resident(contents: &str, page_size: u64) -> Option<u64> {
    let pages: u64 = contents.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages.saturating_mul(page_size))
}

/// Memory reading taken at the start of a phase.
#[derive(Debug, Default)]
pub struct MemoryBaseline {
    baseline: Option<u64>,
}

impl MemoryBaseline {
    pub fn reset(&mut self) {
        self.baseline = resident_bytes();
    }

    /// Signed change in resident bytes since the last `reset`.
    pub fn change(&self) -> Option<i64> {
        let now = resident_bytes()?;
        let base = self.baseline?;
        Some(now as i64 - base as i64)
    }
}

/// `Mem: -1,024` style field.
pub fn format_change(change: i64) -> String {
    let sign = if change < 0 { "-" } else { "" };
    format!("Mem: {sign}{}", group_thousands(change.unsigned_abs()))
}
