//! System statistics for `GET /stats`.
//!
//! ## Data sources
//!
//! | Field          | Source                                                    |
//! |----------------|-----------------------------------------------------------|
//! | `robotName`    | `/proc/sys/kernel/hostname`                               |
//! | `cpuUsage`     | two `/proc/stat` samples, 100 ms apart                    |
//! | `ramUsage`     | `/proc/meminfo` (`MemTotal` vs `MemAvailable`)            |
//! | `temperatureC` | thermal zone / hwmon sysfs, then `vcgencmd measure_temp`  |

use std::path::Path;
use std::time::Duration;

use serde::Serialize;

/// Sysfs temperature sources, tried in order.
const THERMAL_PATHS: &[&str] = &[
    "/sys/class/thermal/thermal_zone0/temp",
    "/sys/class/hwmon/hwmon0/temp1_input",
];

/// Gap between the two `/proc/stat` samples.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Sysfs readings above this are millidegrees.
const MILLIDEGREE_THRESHOLD: f64 = 200.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub robot_name: String,
    /// Percent, 0–100.
    pub cpu_usage: f64,
    /// Percent, 0–100.
    pub ram_usage: f64,
    pub temperature_c: Option<f64>,
}

/// Collect a fresh snapshot. Takes roughly [`CPU_SAMPLE_INTERVAL`].
pub async fn collect() -> SystemStats {
    let before = parse_cpu_times(&read_proc_file("/proc/stat"));
    tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
    let after = parse_cpu_times(&read_proc_file("/proc/stat"));

    let cpu_usage = match (before, after) {
        (Some(b), Some(a)) => cpu_percent(b, a),
        _ => 0.0,
    };

    let hostname = read_proc_file("/proc/sys/kernel/hostname");
    let hostname = hostname.trim();

    SystemStats {
        robot_name: if hostname.is_empty() {
            "unknown".to_string()
        } else {
            hostname.to_string()
        },
        cpu_usage,
        ram_usage: memory_percent(&read_proc_file("/proc/meminfo")),
        temperature_c: read_temperature().await,
    }
}

fn read_proc_file(path: &str) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

/// Aggregate CPU counters from the first line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub idle: u64,
}

/// Parse the aggregate `cpu` line. `idle` counts both idle and iowait.
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().unwrap_or(0))
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // user nice system idle iowait irq softirq steal (guest* already in user)
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().take(8).sum();
    Some(CpuTimes {
        busy: total - idle,
        idle,
    })
}

/// CPU utilisation between two samples, as a percentage.
#[allow(clippy::cast_precision_loss)]
pub fn cpu_percent(before: CpuTimes, after: CpuTimes) -> f64 {
    let busy = after.busy.saturating_sub(before.busy);
    let idle = after.idle.saturating_sub(before.idle);
    let total = busy + idle;
    if total == 0 {
        return 0.0;
    }
    round1(busy as f64 * 100.0 / total as f64)
}

/// Used memory as a percentage of `MemTotal`.
#[allow(clippy::cast_precision_loss)]
pub fn memory_percent(meminfo: &str) -> f64 {
    let (total, available) = parse_meminfo(meminfo);
    if total == 0 {
        return 0.0;
    }
    round1(total.saturating_sub(available) as f64 * 100.0 / total as f64)
}

/// Parse `MemTotal` and `MemAvailable` from `/proc/meminfo` content.
fn parse_meminfo(meminfo: &str) -> (u64, u64) {
    let mut total = 0u64;
    let mut available = 0u64;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total = parse_kb_value(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available = parse_kb_value(rest);
        }
    }
    (total, available)
}

fn parse_kb_value(s: &str) -> u64 {
    s.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Board temperature in °C, or `None` if no source is available.
async fn read_temperature() -> Option<f64> {
    let paths: Vec<&Path> = THERMAL_PATHS.iter().map(Path::new).collect();
    if let Some(t) = read_sysfs_temperature(&paths) {
        return Some(t);
    }

    let output = tokio::process::Command::new("vcgencmd")
        .arg("measure_temp")
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_vcgencmd_temp(&String::from_utf8_lossy(&output.stdout))
}

/// First readable sysfs temperature among `paths`.
pub fn read_sysfs_temperature(paths: &[&Path]) -> Option<f64> {
    paths.iter().find_map(|path| {
        let raw = std::fs::read_to_string(path).ok()?;
        parse_sysfs_temp(&raw)
    })
}

/// Sysfs reports millidegrees on most boards, plain degrees on a few.
pub fn parse_sysfs_temp(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if value > MILLIDEGREE_THRESHOLD {
        Some(value / 1000.0)
    } else {
        Some(value)
    }
}

/// Parse `temp=43.5'C`.
pub fn parse_vcgencmd_temp(output: &str) -> Option<f64> {
    let (_, rest) = output.trim().split_once('=')?;
    let (value, _) = rest.split_once("'C")?;
    value.trim().parse().ok()
}
