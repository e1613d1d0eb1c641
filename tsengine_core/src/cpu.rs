//! Worker pool sizing from the host's cgroup CPU quota rather than the raw
//! machine CPU count, per the query executor's scheduling requirements.

use std::fs;

/// Number of workers the parallel query executor should run. Reads the
/// container's cgroup quota (v2 `cpu.max`, falling back to v1
/// `cpu.cfs_quota_us`/`cpu.cfs_period_us`) and falls back to
/// [`num_cpus::get`] when neither file is present or parseable (bare
/// metal, non-Linux, or an unconstrained cgroup).
pub fn worker_pool_size() -> usize {
    cgroup_quota_cpus().unwrap_or_else(num_cpus::get).max(1)
}

fn cgroup_quota_cpus() -> Option<usize> {
    cgroup_v2_quota().or_else(cgroup_v1_quota)
}

fn cgroup_v2_quota() -> Option<usize> {
    let content = fs::read_to_string("/sys/fs/cgroup/cpu.max").ok()?;
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period: f64 = parts.next()?.parse().ok()?;
    if quota == "max" {
        return None;
    }
    let quota: f64 = quota.parse().ok()?;
    Some((quota / period).ceil() as usize)
}

fn cgroup_v1_quota() -> Option<usize> {
    let quota: i64 = fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us")
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if quota <= 0 {
        return None; // -1 means unconstrained
    }
    let period: i64 = fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us")
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if period <= 0 {
        return None;
    }
    Some(((quota as f64) / (period as f64)).ceil() as usize)
}
