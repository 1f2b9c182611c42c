/// Container-aware CPU limit detection for sizing the tokio worker pool.
///
/// Order: `CANARY_ROUTER_CPU_LIMIT` env var (supports "4" or "4000m"),
/// then cgroup v2 `cpu.max`, then cgroup v1 quota/period, then host CPU
/// count. Without this, tokio sizes its pool from the host CPU count, which
/// over-provisions threads when the container is capped below it.
pub fn get_container_cpu_limit() -> usize {
    if let Ok(cpu_limit) = std::env::var("CANARY_ROUTER_CPU_LIMIT") {
        if let Some(cores) = parse_cpu_value(&cpu_limit) {
            return cores.max(1);
        }
    }

    if let Ok(max) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max") {
        if let Some(cores) = parse_cgroup_v2_cpu(&max) {
            return cores.max(1);
        }
    }

    if let (Ok(quota), Ok(period)) = (
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us"),
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us"),
    ) {
        if let Some(cores) = parse_cgroup_v1_cpu(&quota, &period) {
            return cores.max(1);
        }
    }

    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
}

/// Parse a CPU value: "4" (cores) or "4000m" (millicores).
fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Some(stripped) = value.strip_suffix('m') {
        stripped.parse::<usize>().ok().map(|m| m / 1000)
    } else {
        value.parse::<usize>().ok()
    }
}

/// Parse cgroup v2 `cpu.max`: "quota period" or "max period" (unlimited).
fn parse_cgroup_v2_cpu(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    let quota: i64 = quota.parse().ok()?;
    let period: i64 = period.parse().ok()?;
    if quota > 0 && period > 0 {
        Some((quota / period) as usize)
    } else {
        None
    }
}

/// Parse cgroup v1 `cpu.cfs_quota_us` / `cpu.cfs_period_us`. A quota of -1
/// means unlimited.
fn parse_cgroup_v1_cpu(quota: &str, period: &str) -> Option<usize> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period: i64 = period.trim().parse().ok()?;
    if quota > 0 && period > 0 {
        Some((quota / period) as usize)
    } else {
        None
    }
}
