//! `vigil`: a live terminal dashboard for system metrics.
//!
//! Samples built-in OS metrics on independent schedules and draws them
//! full-screen, or as plain text frames on stdout with `--plain`.

mod input;
mod terminal;

use std::error::Error;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vigil::config::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_HISTORY_CAPACITY, default_timeout};
use vigil::event::{Event, EventSender};
use vigil::render::FrameSink;
use vigil::sampler::system;
use vigil::{Dashboard, DashboardConfig, MetricId, RunSummary, SamplerConfig, SamplerRegistry, TextSink};

use crate::terminal::TerminalSink;

/// Sampling interval used when neither a flag nor a config file sets one.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Metrics shown when neither a flag nor a config file selects any.
const DEFAULT_METRICS: [&str; 2] = ["cpu.percent", "mem.used_bytes"];

/// vigil — live system metrics in the terminal.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
struct Cli {
    /// Sampling interval for every metric (e.g. "500ms", "2s") [default: 1s].
    #[arg(long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Comma-separated metrics to show [default: cpu.percent,mem.used_bytes].
    #[arg(long, value_delimiter = ',')]
    metrics: Option<Vec<String>>,

    /// Per-sample timeout [default: half the interval].
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Consecutive failures before a metric is shown as degraded [default: 3].
    #[arg(long)]
    failure_threshold: Option<u32>,

    /// Successful readings kept per metric [default: 60].
    #[arg(long)]
    history: Option<usize>,

    /// Time between redraws [default: 250ms].
    #[arg(long, value_parser = parse_duration)]
    render_interval: Option<Duration>,

    /// JSON dashboard configuration; explicit flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print text frames to stdout instead of the full-screen UI.
    #[arg(long)]
    plain: bool,

    /// Write logs to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Hide the host name, OS and core count under the title.
    #[arg(long)]
    no_host_info: bool,

    /// Print the metrics available on this machine and exit.
    #[arg(long)]
    list_metrics: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.list_metrics {
        for metric in system::available_metrics() {
            println!("{metric}");
        }
        return;
    }

    if let Err(e) = init_logging(cli.log_file.as_deref(), cli.plain) {
        eprintln!("Error: cannot open log file: {e}");
        std::process::exit(1);
    }

    let result = run(&cli);
    match &result {
        Ok(summary) => info!(
            exit = ?summary.exit,
            frames = summary.frames_rendered,
            abandoned = summary.shutdown.abandoned,
            "vigil exited"
        ),
        Err(e) => {
            error!(error = %e, "vigil failed");
            eprintln!("Error: {e}");
        }
    }

    std::process::exit(exit_code(&result));
}

/// Builds the dashboard and runs it to completion.
fn run(cli: &Cli) -> Result<RunSummary, Box<dyn Error>> {
    let config = build_config(cli)?;
    let registry = build_registry(&config)?;
    let mut dashboard = Dashboard::new(config, registry)?;
    if !cli.no_host_info {
        dashboard = dashboard.with_host_info(system::host_info());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    let summary = if cli.plain {
        run_to_completion(runtime, dashboard, TextSink::new(io::stdout()), forward_signals)?
    } else {
        // Startup failures surface here, before anything is sampled.
        let sink = TerminalSink::new()?;
        run_to_completion(runtime, dashboard, sink, input::spawn)?
    };

    Ok(summary)
}

/// Runs the dashboard on `runtime`, then shuts the runtime down without
/// waiting for blocking calls.
///
/// The dashboard has already given in-flight samples their grace period by
/// the time it returns. An OS call still stuck after that is left behind
/// instead of holding the process open.
fn run_to_completion<S, F>(runtime: Runtime, dashboard: Dashboard, sink: S, input: F) -> vigil::Result<RunSummary>
where
    S: FrameSink,
    F: FnOnce(EventSender, CancellationToken),
{
    let result = runtime.block_on(dashboard.run(sink, input));
    runtime.shutdown_background();
    result
}

fn exit_code<T, E>(result: &Result<T, E>) -> i32 {
    i32::from(result.is_err())
}

/// Installs the log subscriber.
///
/// Logs go to `log_file` if given, to stderr in plain mode, and nowhere
/// otherwise since the full-screen UI owns the terminal.
fn init_logging(log_file: Option<&Path>, plain: bool) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None if plain => builder.with_writer(io::stderr).init(),
        None => {}
    }

    Ok(())
}

/// Resolves the dashboard configuration from the config file and flags.
///
/// Without `--config`, flags (or their defaults) describe every sampler.
/// With it, the file is the base and only flags given explicitly override
/// it; `--metrics` replaces the file's sampler list.
fn build_config(cli: &Cli) -> vigil::Result<DashboardConfig> {
    let mut config = match (&cli.config, &cli.metrics) {
        (Some(path), None) => {
            let mut config = DashboardConfig::load(path)?;
            for sampler in &mut config.samplers {
                apply_overrides(cli, sampler);
            }
            config
        }
        (Some(path), Some(names)) => {
            let mut config = DashboardConfig::load(path)?;
            config.samplers = sampler_configs(cli, names.as_slice())?;
            config
        }
        (None, Some(names)) => DashboardConfig::new(sampler_configs(cli, names.as_slice())?)?,
        (None, None) => DashboardConfig::new(sampler_configs(cli, &DEFAULT_METRICS[..])?)?,
    };

    if let Some(render_interval) = cli.render_interval {
        config.render_interval = render_interval;
    }

    config.validate()?;
    Ok(config)
}

/// Builds one sampler configuration per name from flags and defaults.
fn sampler_configs(cli: &Cli, names: &[impl AsRef<str>]) -> vigil::Result<Vec<SamplerConfig>> {
    let interval = cli.interval.unwrap_or(DEFAULT_INTERVAL);

    names
        .iter()
        .map(|name| {
            SamplerConfig::new(
                MetricId::new(name.as_ref().trim())?,
                interval,
                cli.timeout.unwrap_or_else(|| default_timeout(interval)),
                cli.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD),
                cli.history.unwrap_or(DEFAULT_HISTORY_CAPACITY),
            )
        })
        .collect()
}

fn apply_overrides(cli: &Cli, sampler: &mut SamplerConfig) {
    if let Some(interval) = cli.interval {
        sampler.interval = interval;
        // Keep the timeout within the new interval unless one is given.
        sampler.timeout = default_timeout(interval);
    }
    if let Some(timeout) = cli.timeout {
        sampler.timeout = timeout;
    }
    if let Some(threshold) = cli.failure_threshold {
        sampler.failure_threshold = threshold;
    }
    if let Some(history) = cli.history {
        sampler.history_capacity = history;
    }
}

/// Registers the built-in sampler for every configured metric.
fn build_registry(config: &DashboardConfig) -> vigil::Result<SamplerRegistry> {
    let mut registry = SamplerRegistry::new();
    for metric in config.metrics() {
        registry.register_boxed(metric.clone(), system::builtin(metric)?)?;
    }
    Ok(registry)
}

/// Turns SIGINT/SIGTERM into a shutdown event for plain mode.
fn forward_signals(events: EventSender, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = shutdown_signal() => {
                info!("received shutdown signal");
                let _ = events.send(Event::Shutdown).await;
            }
        }
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let signalled = tokio::select! {
                    result = tokio::signal::ctrl_c() => result.is_ok(),
                    _ = sigterm.recv() => true,
                };
                if !signalled {
                    sigterm.recv().await;
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Parses a duration with a unit suffix: "250ms", "1s", "5m", "1h".
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let (num_str, unit) = match s.strip_suffix("ms") {
        Some(num) => (num, "ms"),
        None => s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8)),
    };
    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}': expected a number followed by ms, s, m, or h"))?;

    let too_long = || format!("duration '{s}' is too long");
    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "m" => num.checked_mul(60).map(Duration::from_secs).ok_or_else(too_long),
        "h" => num.checked_mul(3600).map(Duration::from_secs).ok_or_else(too_long),
        _ => Err(format!("unknown duration unit '{unit}': use ms, s, m, or h")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;
    use tempfile::tempdir;
    use vigil::error::{ConfigError, SamplerError};
    use vigil::{Blocking, BlockingSample, Value, VigilError};

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("vigil").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("1s"), Ok(Duration::from_secs(1)));
        assert_eq!(parse_duration(" 5m "), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("3d").is_err());
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        let huge = format!("{}h", u64::MAX / 1000);
        assert_eq!(parse_duration(&huge), Err(format!("duration '{huge}' is too long")));
        assert!(parse_duration(&format!("{}m", u64::MAX)).is_err());
        assert_eq!(parse_duration(&format!("{}s", u64::MAX)), Ok(Duration::from_secs(u64::MAX)));

        let parse = |args: &[&str]| Cli::try_parse_from(std::iter::once("vigil").chain(args.iter().copied()));
        assert!(parse(&["--interval", huge.as_str()]).is_err());
    }

    struct StuckOsCall;

    impl BlockingSample for StuckOsCall {
        fn sample_blocking(&mut self, _metric: &MetricId) -> Result<Value, SamplerError> {
            std::thread::sleep(Duration::from_secs(6));
            Ok(Value::Percent(1.0))
        }
    }

    #[test]
    fn test_stuck_os_call_does_not_delay_exit() {
        let metric = MetricId::new("cpu.percent").unwrap();
        let sampler = SamplerConfig::new(metric.clone(), Duration::from_secs(1), Duration::from_millis(500), 3, 60).unwrap();
        let mut config = DashboardConfig::new(vec![sampler]).unwrap();
        config.shutdown_grace = Duration::from_millis(100);

        let mut registry = SamplerRegistry::new();
        registry.register(metric, Blocking::new(StuckOsCall)).unwrap();
        let dashboard = Dashboard::new(config, registry).unwrap();

        let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().unwrap();
        let start = Instant::now();
        let summary = run_to_completion(runtime, dashboard, TextSink::new(io::sink()), |events, _cancel| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = events.send(Event::Shutdown).await;
            });
        })
        .unwrap();

        assert_eq!(summary.shutdown.abandoned, 1);
        assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
    }

    #[test]
    fn test_defaults() {
        let config = build_config(&cli(&[])).unwrap();
        let names: Vec<_> = config.metrics().map(MetricId::as_str).collect();
        assert_eq!(names, DEFAULT_METRICS);

        let cpu = &config.samplers[0];
        assert_eq!(cpu.interval, Duration::from_secs(1));
        assert_eq!(cpu.timeout, Duration::from_millis(500));
        assert_eq!(cpu.failure_threshold, 3);
        assert_eq!(cpu.history_capacity, 60);
        assert_eq!(config.render_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_flags_describe_samplers() {
        let config = build_config(&cli(&[
            "--metrics",
            "load.avg1, system.uptime",
            "--interval",
            "2s",
            "--failure-threshold",
            "5",
            "--history",
            "10",
            "--render-interval",
            "100ms",
        ]))
        .unwrap();

        let names: Vec<_> = config.metrics().map(MetricId::as_str).collect();
        assert_eq!(names, ["load.avg1", "system.uptime"]);
        assert!(config.samplers.iter().all(|s| s.interval == Duration::from_secs(2)
            && s.timeout == Duration::from_secs(1)
            && s.failure_threshold == 5
            && s.history_capacity == 10));
        assert_eq!(config.render_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_timeout_above_interval_is_rejected() {
        let err = build_config(&cli(&["--interval", "1s", "--timeout", "2s"])).unwrap_err();
        assert!(matches!(err, VigilError::Config(ConfigError::InvalidTimeout { .. })));
    }

    #[test]
    fn test_config_file_with_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vigil.json");
        fs::write(
            &path,
            r#"{
                "samplers": [
                    { "metric": "mem.percent", "interval": 5.0, "failure_threshold": 4 },
                    { "metric": "disk.used_bytes", "interval": 10.0 }
                ],
                "title": "db host"
            }"#,
        )
        .unwrap();
        let path = path.to_str().unwrap();

        // The file alone.
        let config = build_config(&cli(&["--config", path])).unwrap();
        assert_eq!(config.title, "db host");
        assert_eq!(config.samplers[0].interval, Duration::from_secs(5));
        assert_eq!(config.samplers[0].failure_threshold, 4);

        // Explicit flags win; everything else comes from the file.
        let config = build_config(&cli(&["--config", path, "--interval", "500ms"])).unwrap();
        assert_eq!(config.samplers.len(), 2);
        assert!(config.samplers.iter().all(|s| s.interval == Duration::from_millis(500)
            && s.timeout == Duration::from_millis(250)));
        assert_eq!(config.samplers[0].failure_threshold, 4);

        // --metrics replaces the file's sampler list.
        let config = build_config(&cli(&["--config", path, "--metrics", "cpu.percent"])).unwrap();
        let names: Vec<_> = config.metrics().map(MetricId::as_str).collect();
        assert_eq!(names, ["cpu.percent"]);
        assert_eq!(config.title, "db host");
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        let config = build_config(&cli(&["--metrics", "gpu.percent"])).unwrap();
        let err = build_registry(&config).unwrap_err();
        assert!(matches!(
            err,
            VigilError::Config(ConfigError::UnknownMetric { ref metric, .. }) if metric == "gpu.percent"
        ));
    }

    #[test]
    fn test_invalid_metric_id_is_rejected() {
        let err = build_config(&cli(&["--metrics", "cpu percent"])).unwrap_err();
        assert!(matches!(err, VigilError::Config(ConfigError::InvalidMetricId { .. })));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code::<(), &str>(&Ok(())), 0);
        assert_eq!(exit_code::<(), &str>(&Err("terminal unavailable")), 1);
    }

    #[test]
    fn test_flag_parsing_errors() {
        let parse = |args: &[&str]| Cli::try_parse_from(std::iter::once("vigil").chain(args.iter().copied()));
        assert!(parse(&["--interval", "soon"]).is_err());
        assert!(parse(&["--failure-threshold", "-1"]).is_err());
        assert!(parse(&["--plain", "--list-metrics"]).is_ok());
        assert!(parse(&["--no-host-info"]).unwrap().no_host_info);
    }
}
