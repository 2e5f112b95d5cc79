//! Process resource usage, read from `getrusage` and `/proc/self`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use nix::sys::resource::{UsageWho, getrusage};
use nix::sys::time::TimeVal;

use super::MetricsError;

const PROC_STATUS: &str = "/proc/self/status";
const PROC_FD_DIR: &str = "/proc/self/fd";

/// One consistent reading of the process's resource usage.
///
/// Memory figures are in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeSnapshot {
    /// Logical CPUs available.
    pub cpu_num: i64,
    /// Threads in this process.
    pub thread_num: i64,
    /// Resident set size.
    pub memory_resident: i64,
    /// Virtual memory size.
    pub memory_virtual: i64,
    /// Peak resident set size.
    pub memory_peak_resident: i64,
    /// Data segment size.
    pub memory_data: i64,
    /// Stack size.
    pub memory_stack: i64,
    /// Open file descriptors.
    pub fd_num: i64,
    /// Cumulative minor page faults.
    pub minor_faults: i64,
    /// Cumulative major page faults.
    pub major_faults: i64,
    /// Cumulative voluntary and involuntary context switches.
    pub ctx_switches: i64,
    /// Cumulative user plus system CPU time.
    pub cpu_time: Duration,
}

/// Fields of `/proc/self/status` the sampler reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ProcStatus {
    pub(crate) vm_rss: i64,
    pub(crate) vm_size: i64,
    pub(crate) vm_hwm: i64,
    pub(crate) vm_data: i64,
    pub(crate) vm_stk: i64,
    pub(crate) threads: i64,
}

/// Parses the `Key:   value [kB]` lines of `/proc/<pid>/status`.
pub(crate) fn parse_status(text: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let Some(value) = parts.next().and_then(|raw| raw.parse::<i64>().ok()) else {
            continue;
        };
        let scaled = match parts.next() {
            Some(unit) if unit.eq_ignore_ascii_case("kb") => value.saturating_mul(1024),
            _ => value,
        };
        match key {
            "VmRSS" => status.vm_rss = scaled,
            "VmSize" => status.vm_size = scaled,
            "VmHWM" => status.vm_hwm = scaled,
            "VmData" => status.vm_data = scaled,
            "VmStk" => status.vm_stk = scaled,
            "Threads" => status.threads = scaled,
            _ => {}
        }
    }
    status
}

fn timeval_to_duration(value: TimeVal) -> Duration {
    let secs = u64::try_from(value.tv_sec()).unwrap_or(0);
    let micros = u64::try_from(value.tv_usec()).unwrap_or(0);
    Duration::from_secs(secs).saturating_add(Duration::from_micros(micros))
}

fn count_entries(dir: &Path) -> i64 {
    // The directory handle used for the listing shows up as one entry.
    fs::read_dir(dir).map_or(0, |entries| {
        i64::try_from(entries.count()).unwrap_or(i64::MAX).saturating_sub(1).max(0)
    })
}

fn to_i64(value: impl TryInto<i64>) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// Takes one snapshot of the current process.
///
/// `getrusage` failures are errors. Missing `/proc` entries leave the
/// affected fields at zero, except peak resident memory, which falls back to
/// the `getrusage` maximum.
pub fn capture() -> Result<RuntimeSnapshot, MetricsError> {
    let usage = getrusage(UsageWho::RUSAGE_SELF)
        .map_err(|errno| MetricsError::Usage { source: errno.into() })?;
    let status = fs::read_to_string(PROC_STATUS)
        .map(|text| parse_status(&text))
        .unwrap_or_default();
    let max_rss = to_i64(usage.max_rss()).saturating_mul(1024);

    Ok(RuntimeSnapshot {
        cpu_num: to_i64(num_cpus::get()),
        thread_num: status.threads,
        memory_resident: status.vm_rss,
        memory_virtual: status.vm_size,
        memory_peak_resident: if status.vm_hwm > 0 { status.vm_hwm } else { max_rss },
        memory_data: status.vm_data,
        memory_stack: status.vm_stk,
        fd_num: count_entries(Path::new(PROC_FD_DIR)),
        minor_faults: to_i64(usage.minor_page_faults()),
        major_faults: to_i64(usage.major_page_faults()),
        ctx_switches: to_i64(usage.voluntary_context_switches())
            .saturating_add(to_i64(usage.involuntary_context_switches())),
        cpu_time: timeval_to_duration(usage.user_time())
            .saturating_add(timeval_to_duration(usage.system_time())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str = "Name:\twebtermd\n\
        Threads:\t7\n\
        VmPeak:\t  300000 kB\n\
        VmSize:\t  200000 kB\n\
        VmHWM:\t    5000 kB\n\
        VmRSS:\t    4000 kB\n\
        VmData:\t    3000 kB\n\
        VmStk:\t     132 kB\n\
        voluntary_ctxt_switches:\t12\n";

    #[test]
    fn parses_status_fields_in_bytes() {
        let status = parse_status(STATUS);
        assert_eq!(status.threads, 7);
        assert_eq!(status.vm_size, 200_000 * 1024);
        assert_eq!(status.vm_hwm, 5_000 * 1024);
        assert_eq!(status.vm_rss, 4_000 * 1024);
        assert_eq!(status.vm_data, 3_000 * 1024);
        assert_eq!(status.vm_stk, 132 * 1024);
    }

    #[test]
    fn ignores_malformed_lines() {
        let status = parse_status("VmRSS:\tlots kB\nno colon here\nThreads:\n");
        assert_eq!(status, ProcStatus::default());
    }

    #[test]
    fn capture_reports_live_process() {
        let snapshot = capture().expect("snapshot");
        assert!(snapshot.cpu_num >= 1);
        assert!(snapshot.memory_peak_resident > 0);
        assert!(snapshot.fd_num >= 0);
        assert!(snapshot.minor_faults >= 0);
    }

    #[test]
    fn converts_timeval() {
        let duration = timeval_to_duration(TimeVal::new(2, 500_000));
        assert_eq!(duration, Duration::from_millis(2_500));
    }
}
