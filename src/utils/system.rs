// src/utils/system.rs: System functions

use sysinfo::{CpuRefreshKind, RefreshKind, System};


/// Physical cores available to worker pools, at least 1.
///
/// # Returns
///
/// usize physical core count, logical count when physical is unknown
pub fn available_cores() -> usize {
    let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing());
    let system = System::new_with_specifics(refresh_kind);
    System::physical_core_count()
        .or_else(|| Some(system.cpus().len()))
        .filter(|n| *n > 0)
        .unwrap_or(1)
}


/// Worker pool size: never more workers than tasks, cores or configured threads.
///
/// # Arguments
///
/// * `threads` - configured thread count
/// * `cores` - available cores
/// * `tasks` - number of queued items
pub fn pool_size(threads: usize, cores: usize, tasks: usize) -> usize {
    threads.min(cores).min(tasks).max(1)
}
