//! Process resource sampling for system health checks.

use std::io;

/// One reading of process resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemSample {
    /// Resident set size of this process.
    pub resident_bytes: u64,
    /// Memory the process is allowed to use.
    pub memory_limit_bytes: u64,
    /// User plus system CPU time consumed so far.
    pub cpu_time_ms: u64,
}

impl SystemSample {
    /// Resident memory as a percentage of the limit. 0 when the limit is unknown.
    pub fn utilization_percent(&self) -> f64 {
        if self.memory_limit_bytes == 0 {
            return 0.0;
        }
        self.resident_bytes as f64 / self.memory_limit_bytes as f64 * 100.0
    }
}

/// Source of [`SystemSample`]s.
pub trait SystemProbe: Send + Sync {
    fn sample(&self) -> io::Result<SystemSample>;
}

/// Scheduler ticks per second used by `/proc/self/stat`.
const CLOCK_TICKS_PER_SEC: u64 = 100;

/// Reads `/proc` on Linux.
///
/// The memory limit is `memory_limit_mb` when set, otherwise `MemTotal`.
#[derive(Debug, Clone, Default)]
pub struct ProcfsProbe {
    memory_limit_mb: Option<u64>,
}

impl ProcfsProbe {
    pub fn new(memory_limit_mb: Option<u64>) -> Self {
        Self { memory_limit_mb }
    }
}

impl SystemProbe for ProcfsProbe {
    fn sample(&self) -> io::Result<SystemSample> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        let resident_bytes = parse_status_rss_bytes(&status)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "VmRSS not found"))?;

        let memory_limit_bytes = match self.memory_limit_mb {
            Some(mb) => mb_to_bytes(mb),
            None => {
                let meminfo = std::fs::read_to_string("/proc/meminfo")?;
                parse_meminfo_total_bytes(&meminfo).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "MemTotal not found")
                })?
            }
        };

        let stat = std::fs::read_to_string("/proc/self/stat")?;
        let cpu_ticks = parse_stat_cpu_ticks(&stat)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Malformed stat line"))?;

        Ok(SystemSample {
            resident_bytes,
            memory_limit_bytes,
            cpu_time_ms: cpu_ticks.saturating_mul(1000) / CLOCK_TICKS_PER_SEC,
        })
    }
}

/// Value of a `Key:   1234 kB` line, in bytes.
fn parse_kb_line(text: &str, key: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(':'))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb.saturating_mul(1024))
}

/// Configured limits are clamped rather than wrapped.
fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

pub(crate) fn parse_status_rss_bytes(status: &str) -> Option<u64> {
    parse_kb_line(status, "VmRSS")
}

pub(crate) fn parse_meminfo_total_bytes(meminfo: &str) -> Option<u64> {
    parse_kb_line(meminfo, "MemTotal")
}

/// `utime + stime` from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesized and may contain spaces, so fields are
/// counted from the last `)`.
pub(crate) fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    let (_, rest) = stat.rsplit_once(')')?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is the state (field 3); utime and stime are fields 14 and 15
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime.saturating_add(stime))
}
