//! Built-in OS samplers backed by `sysinfo`.
//!
//! Every built-in is a [`BlockingSample`] wrapped in [`Blocking`], because
//! `sysinfo` refreshes are synchronous reads of `/proc` (or the platform
//! equivalent). Each sampler owns its own `sysinfo` handle, so metrics never
//! contend on shared state.
//!
//! | Metric                 | Value     | Source |
//! |------------------------|-----------|--------|
//! | `cpu.percent`          | `Percent` | global CPU usage since the last refresh |
//! | `mem.used_bytes`       | `Usage`   | used / total memory |
//! | `mem.percent`          | `Percent` | used memory as a percentage |
//! | `swap.used_bytes`      | `Usage`   | used / total swap |
//! | `disk.used_bytes`      | `Usage`   | used / total space over all disks |
//! | `disk.<mount>.used_bytes` | `Usage` | used / total space of one mounted disk |
//! | `net.rx_bytes_per_sec` | `Rate`    | received bytes over all interfaces |
//! | `net.tx_bytes_per_sec` | `Rate`    | transmitted bytes over all interfaces |
//! | `load.avg1`            | `Gauge`   | one-minute load average |
//! | `system.uptime`        | `Seconds` | time since boot |
//!
//! Per-disk metrics name the mount point as a slug: `/` is `root`, and other
//! mount points drop the leading separator and turn the rest into `_`, so
//! `/mnt/data` is `disk.mnt_data.used_bytes`. [`available_metrics`] lists the
//! ones present on this machine.
//!
//! [`host_info`] reads the static facts shown under the dashboard title.

use std::path::Path;
use std::time::Instant;

use sysinfo::{Disks, Networks, System};

use crate::error::{ConfigError, Result, SamplerError, VigilError};
use crate::metric::{MetricId, Value};
use crate::render::HostInfo;

use super::{Blocking, BlockingSample, Sampler};

/// Identifiers of every built-in sampler, in the order `--list-metrics` shows.
pub const BUILTIN_METRICS: &[&str] = &[
    "cpu.percent",
    "mem.used_bytes",
    "mem.percent",
    "swap.used_bytes",
    "disk.used_bytes",
    "net.rx_bytes_per_sec",
    "net.tx_bytes_per_sec",
    "load.avg1",
    "system.uptime",
];

/// Prefix and suffix of per-disk metric identifiers.
const DISK_PREFIX: &str = "disk.";
const DISK_SUFFIX: &str = ".used_bytes";

/// Returns every metric this machine can sample: [`BUILTIN_METRICS`]
/// followed by one `disk.<mount>.used_bytes` per mounted disk.
pub fn available_metrics() -> Vec<String> {
    let mut metrics: Vec<String> = BUILTIN_METRICS.iter().map(ToString::to_string).collect();
    for slug in mount_slugs(&Disks::new_with_refreshed_list()) {
        let id = disk_metric(&slug);
        // Very long mount paths do not fit an identifier.
        if MetricId::new(&id).is_ok() && !metrics.contains(&id) {
            metrics.push(id);
        }
    }
    metrics
}

/// Reads the host name, operating system and logical CPU count.
///
/// Facts the platform does not report are shown as `unknown`.
pub fn host_info() -> HostInfo {
    let mut system = System::new();
    system.refresh_cpu_usage();

    let os = System::long_os_version()
        .or_else(|| System::name().map(|name| format!("{name} {}", System::os_version().unwrap_or_default())))
        .map_or_else(|| "unknown".to_string(), |os| os.trim().to_string());

    HostInfo {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        os,
        cores: system.cpus().len(),
    }
}

/// Resolves a metric identifier to a fresh built-in sampler.
///
/// # Errors
///
/// Returns [`ConfigError::UnknownMetric`] if `metric` is neither one of
/// [`BUILTIN_METRICS`] nor a per-disk metric for a mounted disk.
pub fn builtin(metric: &MetricId) -> Result<Box<dyn Sampler>> {
    if let Some(slug) = disk_slug(metric.as_str()) {
        return match MountSpace::new(slug) {
            Some(disk) => Ok(Box::new(Blocking::new(disk))),
            None => Err(unknown(metric)),
        };
    }

    let sampler: Box<dyn Sampler> = match metric.as_str() {
        "cpu.percent" => Box::new(Blocking::new(Cpu::new())),
        "mem.used_bytes" => Box::new(Blocking::new(Memory::new(MemoryView::Usage))),
        "mem.percent" => Box::new(Blocking::new(Memory::new(MemoryView::Percent))),
        "swap.used_bytes" => Box::new(Blocking::new(Memory::new(MemoryView::Swap))),
        "disk.used_bytes" => Box::new(Blocking::new(DiskSpace::new())),
        "net.rx_bytes_per_sec" => Box::new(Blocking::new(Network::new(Direction::Received))),
        "net.tx_bytes_per_sec" => Box::new(Blocking::new(Network::new(Direction::Transmitted))),
        "load.avg1" => Box::new(Blocking::new(LoadAverage)),
        "system.uptime" => Box::new(Blocking::new(Uptime)),
        _ => return Err(unknown(metric)),
    };
    Ok(sampler)
}

fn unknown(metric: &MetricId) -> VigilError {
    ConfigError::UnknownMetric {
        metric: metric.to_string(),
        known: available_metrics().join(", "),
    }
    .into()
}

/// Returns the mount slug of a `disk.<mount>.used_bytes` identifier.
fn disk_slug(id: &str) -> Option<&str> {
    id.strip_prefix(DISK_PREFIX)?
        .strip_suffix(DISK_SUFFIX)
        .filter(|slug| !slug.is_empty())
}

fn disk_metric(slug: &str) -> String {
    format!("{DISK_PREFIX}{slug}{DISK_SUFFIX}")
}

/// Turns a mount point into the identifier-safe name used in per-disk metrics.
fn mount_slug(mount: &Path) -> String {
    let raw = mount.to_string_lossy();
    let slug: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() { "root".to_string() } else { slug.to_string() }
}

fn mount_slugs(disks: &Disks) -> Vec<String> {
    disks.list().iter().map(|disk| mount_slug(disk.mount_point())).collect()
}

/// Global CPU usage.
///
/// `sysinfo` computes usage from the delta between two refreshes, so the
/// constructor takes the first measurement.
struct Cpu {
    system: System,
}

impl Cpu {
    fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl BlockingSample for Cpu {
    fn sample_blocking(&mut self, _metric: &MetricId) -> std::result::Result<Value, SamplerError> {
        self.system.refresh_cpu_usage();
        Ok(Value::Percent(f64::from(self.system.global_cpu_usage())))
    }
}

#[derive(Debug, Clone, Copy)]
enum MemoryView {
    Usage,
    Percent,
    Swap,
}

/// Memory and swap usage.
struct Memory {
    system: System,
    view: MemoryView,
}

impl Memory {
    fn new(view: MemoryView) -> Self {
        Self {
            system: System::new(),
            view,
        }
    }
}

impl BlockingSample for Memory {
    fn sample_blocking(&mut self, metric: &MetricId) -> std::result::Result<Value, SamplerError> {
        self.system.refresh_memory();

        let (used, total) = match self.view {
            MemoryView::Usage | MemoryView::Percent => {
                (self.system.used_memory(), self.system.total_memory())
            }
            MemoryView::Swap => (self.system.used_swap(), self.system.total_swap()),
        };

        if total == 0 && !matches!(self.view, MemoryView::Swap) {
            return Err(SamplerError::Source {
                metric: metric.to_string(),
                reason: "total memory reported as zero".to_string(),
            });
        }

        Ok(match self.view {
            MemoryView::Percent => Value::Percent(Value::Usage { used, total }.as_f64()),
            MemoryView::Usage | MemoryView::Swap => Value::Usage { used, total },
        })
    }
}

/// Used space summed over all mounted disks.
struct DiskSpace {
    disks: Disks,
}

impl DiskSpace {
    fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl BlockingSample for DiskSpace {
    fn sample_blocking(&mut self, metric: &MetricId) -> std::result::Result<Value, SamplerError> {
        self.disks.refresh(true);

        let (used, total) = self.disks.list().iter().fold((0u64, 0u64), |(used, total), disk| {
            let size = disk.total_space();
            let free = disk.available_space();
            (used + size.saturating_sub(free), total + size)
        });

        if total == 0 {
            return Err(SamplerError::Source {
                metric: metric.to_string(),
                reason: "no disks found".to_string(),
            });
        }

        Ok(Value::Usage { used, total })
    }
}

/// Space on the disk mounted at one mount point.
///
/// The disk is looked up by slug on every refresh, so a remount keeps being
/// followed and an unmount becomes a failed reading.
struct MountSpace {
    disks: Disks,
    slug: String,
}

impl MountSpace {
    /// Returns `None` if no mounted disk has this slug.
    fn new(slug: &str) -> Option<Self> {
        let disks = Disks::new_with_refreshed_list();
        mount_slugs(&disks).iter().any(|s| s == slug).then(|| Self {
            disks,
            slug: slug.to_string(),
        })
    }
}

impl BlockingSample for MountSpace {
    fn sample_blocking(&mut self, metric: &MetricId) -> std::result::Result<Value, SamplerError> {
        self.disks.refresh(true);

        let disk = self
            .disks
            .list()
            .iter()
            .find(|disk| mount_slug(disk.mount_point()) == self.slug)
            .ok_or_else(|| SamplerError::Source {
                metric: metric.to_string(),
                reason: format!("no disk mounted for '{}'", self.slug),
            })?;

        let total = disk.total_space();
        if total == 0 {
            return Err(SamplerError::Source {
                metric: metric.to_string(),
                reason: "disk reports zero size".to_string(),
            });
        }

        Ok(Value::Usage {
            used: total.saturating_sub(disk.available_space()),
            total,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Received,
    Transmitted,
}

/// Network throughput summed over all interfaces.
///
/// `sysinfo` reports bytes since the previous refresh; dividing by the time
/// since that refresh gives a rate.
struct Network {
    networks: Networks,
    direction: Direction,
    last_refresh: Instant,
}

impl Network {
    fn new(direction: Direction) -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
            direction,
            last_refresh: Instant::now(),
        }
    }
}

impl BlockingSample for Network {
    #[allow(clippy::cast_precision_loss)] // Byte counts per interval are far below 2^52
    fn sample_blocking(&mut self, metric: &MetricId) -> std::result::Result<Value, SamplerError> {
        self.networks.refresh(true);
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refresh).as_secs_f64();
        self.last_refresh = now;

        if elapsed <= 0.0 {
            return Err(SamplerError::Source {
                metric: metric.to_string(),
                reason: "refreshed twice at the same instant".to_string(),
            });
        }

        let bytes: u64 = self
            .networks
            .list()
            .values()
            .map(|data| match self.direction {
                Direction::Received => data.received(),
                Direction::Transmitted => data.transmitted(),
            })
            .sum();

        Ok(Value::Rate(bytes as f64 / elapsed))
    }
}

/// One-minute load average.
struct LoadAverage;

impl BlockingSample for LoadAverage {
    fn sample_blocking(&mut self, _metric: &MetricId) -> std::result::Result<Value, SamplerError> {
        Ok(Value::Gauge(System::load_average().one))
    }
}

/// Seconds since boot.
struct Uptime;

impl BlockingSample for Uptime {
    fn sample_blocking(&mut self, _metric: &MetricId) -> std::result::Result<Value, SamplerError> {
        Ok(Value::Seconds(System::uptime()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_builtin_resolves() {
        for name in BUILTIN_METRICS {
            let metric = MetricId::new(name).unwrap();
            assert!(builtin(&metric).is_ok(), "{name} should resolve");
        }
    }

    #[test]
    fn test_unknown_builtin_lists_known_metrics() {
        let metric = MetricId::new("gpu.percent").unwrap();
        let Err(err) = builtin(&metric) else {
            panic!("gpu.percent should not resolve");
        };
        assert!(matches!(err, VigilError::Config(ConfigError::UnknownMetric { .. })));
        assert!(err.to_string().contains("cpu.percent"));
    }

    #[test]
    fn test_mount_slugs() {
        assert_eq!(mount_slug(Path::new("/")), "root");
        assert_eq!(mount_slug(Path::new("/home")), "home");
        assert_eq!(mount_slug(Path::new("/mnt/data")), "mnt_data");
        assert_eq!(mount_slug(Path::new("/run/media/USB Stick")), "run_media_usb_stick");
        assert_eq!(mount_slug(Path::new("C:\\")), "c");

        assert_eq!(disk_slug("disk.mnt_data.used_bytes"), Some("mnt_data"));
        assert_eq!(disk_slug("disk.used_bytes"), None);
        assert_eq!(disk_slug("disk..used_bytes"), None);
        assert_eq!(disk_metric("root"), "disk.root.used_bytes");
    }

    #[test]
    fn test_available_metrics_resolve() {
        let metrics = available_metrics();
        assert!(metrics.starts_with(&BUILTIN_METRICS.iter().map(ToString::to_string).collect::<Vec<_>>()));

        for name in &metrics {
            let metric = MetricId::new(name).unwrap();
            assert!(builtin(&metric).is_ok(), "{name} should resolve");
        }
    }

    #[test]
    fn test_unmounted_disk_is_unknown() {
        let metric = MetricId::new("disk.no_such_mount_4f1c.used_bytes").unwrap();
        let Err(err) = builtin(&metric) else {
            panic!("an unmounted disk should not resolve");
        };
        assert!(matches!(err, VigilError::Config(ConfigError::UnknownMetric { .. })));
    }

    #[test]
    fn test_per_disk_usage_reads() {
        let metrics = available_metrics();
        let Some(slug) = metrics.iter().find_map(|id| disk_slug(id)) else {
            return;
        };
        let metric = MetricId::new(disk_metric(slug)).unwrap();
        let mut disk = MountSpace::new(slug).unwrap();
        match disk.sample_blocking(&metric) {
            Ok(Value::Usage { used, total }) => assert!(used <= total),
            // Pseudo filesystems can report zero size.
            Err(SamplerError::Source { .. }) => {}
            other => panic!("unexpected reading {other:?}"),
        }
    }

    #[test]
    fn test_host_info_is_filled() {
        let host = host_info();
        assert!(!host.hostname.is_empty());
        assert!(!host.os.is_empty());
        assert!(host.cores >= 1);
    }

    #[test]
    fn test_uptime_and_memory_read() {
        let metric = MetricId::new("system.uptime").unwrap();
        assert!(matches!(Uptime.sample_blocking(&metric), Ok(Value::Seconds(_))));

        let metric = MetricId::new("swap.used_bytes").unwrap();
        let value = Memory::new(MemoryView::Swap).sample_blocking(&metric).unwrap();
        match value {
            Value::Usage { used, total } => assert!(used <= total || total == 0),
            other => panic!("unexpected value {other:?}"),
        }
    }
}
