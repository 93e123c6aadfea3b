//! Snapshot to frame rendering.
//!
//! The [`Renderer`] is a pure function from [`Snapshot`] to [`Frame`]. A
//! frame is a list of drawing primitives (bars and text lines) that any
//! [`FrameSink`] can draw: the plain-text [`TextSink`] here, or a full-screen
//! terminal sink in the CLI.
//!
//! # Health
//!
//! Every line carries a [`Health`]:
//!
//! - `Pending`: no reading yet
//! - `Fresh`: the latest reading has a value
//! - `Stale`: the latest reading failed, failure count below the threshold
//! - `Degraded`: the failure count reached the threshold
//!
//! Stale and degraded lines show [`STALE_MARKER`] and never the last good
//! value, so an old number is never presented as current.

use std::io::Write;

use crate::aggregator::MetricState;
use crate::error::RenderError;
use crate::history::Statistic;
use crate::metric::{MetricId, Value};
use crate::snapshot::Snapshot;

/// Marker shown in place of a value that is not current.
pub const STALE_MARKER: &str = "—";

/// Freshness of one rendered metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    /// The latest reading carried a value.
    Fresh,
    /// No reading has arrived yet.
    Pending,
    /// The latest reading failed; the failure threshold is not reached.
    Stale,
    /// The failure threshold is reached.
    Degraded,
}

impl Health {
    /// Returns a short lowercase name, empty for `Fresh`.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Fresh => "",
            Self::Pending => "pending",
            Self::Stale => "stale",
            Self::Degraded => "degraded",
        }
    }
}

/// A metric drawn as a fill bar.
#[derive(Debug, Clone, PartialEq)]
pub struct BarLine {
    /// Metric label.
    pub label: String,
    /// Fill ratio in `0.0..=1.0`; `None` when the value is not current.
    pub ratio: Option<f64>,
    /// Text shown next to the bar.
    pub caption: String,
    /// Freshness of the value.
    pub health: Health,
    /// Scalar history, oldest first; empty when not fresh.
    pub trend: Vec<f64>,
    /// Average over the history window.
    pub average: Option<f64>,
    /// Peak over the history window.
    pub peak: Option<f64>,
}

/// A metric drawn as a text field.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    /// Metric label.
    pub label: String,
    /// Formatted value, or [`STALE_MARKER`].
    pub text: String,
    /// Freshness of the value.
    pub health: Health,
}

/// One drawable line of a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// A fill bar.
    Bar(BarLine),
    /// A labelled text field.
    Text(TextLine),
}

impl Primitive {
    /// Returns the label of the line.
    pub fn label(&self) -> &str {
        match self {
            Self::Bar(bar) => &bar.label,
            Self::Text(text) => &text.label,
        }
    }

    /// Returns the health of the line.
    pub fn health(&self) -> Health {
        match self {
            Self::Bar(bar) => bar.health,
            Self::Text(text) => text.health,
        }
    }
}

/// Static facts about the monitored machine, shown under the title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Host name.
    pub hostname: String,
    /// Operating system name and version.
    pub os: String,
    /// Logical CPU count.
    pub cores: usize,
}

impl HostInfo {
    /// Returns the one-line summary drawn under the title.
    pub fn summary(&self) -> String {
        let unit = if self.cores == 1 { "core" } else { "cores" };
        format!("{} | {} | {} {unit}", self.hostname, self.os, self.cores)
    }
}

/// A rendered screen, independent of any terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Title line.
    pub title: String,
    /// Host facts, if the dashboard was given any.
    pub host: Option<HostInfo>,
    /// One primitive per configured metric, in display order.
    pub lines: Vec<Primitive>,
    /// Whether output is paused; set by the event loop.
    pub paused: bool,
}

impl Frame {
    /// Returns the line for `label`, if present.
    pub fn line(&self, label: &str) -> Option<&Primitive> {
        self.lines.iter().find(|line| line.label() == label)
    }

    /// Renders the frame as plain text with bars `bar_width` cells wide.
    pub fn to_text(&self, bar_width: usize) -> String {
        let label_width = self
            .lines
            .iter()
            .map(|line| line.label().chars().count())
            .max()
            .unwrap_or(0);

        let mut out = self.title.clone();
        if self.paused {
            out.push_str(" [paused]");
        }
        out.push('\n');
        if let Some(host) = &self.host {
            out.push_str(&host.summary());
            out.push('\n');
        }

        for line in &self.lines {
            let (label, body) = match line {
                Primitive::Bar(bar) => {
                    let mut body = format!("[{}] {}", fill_bar(bar.ratio, bar_width), bar.caption);
                    if let (Some(average), Some(peak)) = (bar.average, bar.peak) {
                        body.push_str(&format!("  avg {average:.1} peak {peak:.1}"));
                    }
                    (&bar.label, body)
                }
                Primitive::Text(text) => (&text.label, text.text.clone()),
            };

            out.push_str(&format!("{label:<label_width$}  {body}"));
            let tag = line.health().tag();
            if !tag.is_empty() && line.health() != Health::Pending {
                out.push_str(&format!(" ({tag})"));
            }
            out.push('\n');
        }

        out
    }
}

/// Builds frames from snapshots.
#[derive(Debug, Clone)]
pub struct Renderer {
    title: String,
    host: Option<HostInfo>,
}

impl Renderer {
    /// Creates a renderer that titles every frame with `title`.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            host: None,
        }
    }

    /// Shows `host` under the title of every frame.
    #[must_use]
    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = Some(host);
        self
    }

    /// Renders one frame. Pure: the same snapshot always gives the same frame.
    pub fn render(&self, snapshot: &Snapshot) -> Frame {
        let lines = snapshot
            .iter()
            .map(|(metric, state)| render_line(metric, state))
            .collect();

        Frame {
            title: self.title.clone(),
            host: self.host.clone(),
            lines,
            paused: false,
        }
    }
}

fn render_line(metric: &MetricId, state: Option<&MetricState>) -> Primitive {
    let label = metric.to_string();

    let Some(state) = state else {
        return Primitive::Text(TextLine {
            label,
            text: STALE_MARKER.to_string(),
            health: Health::Pending,
        });
    };

    let health = if state.is_degraded() {
        Health::Degraded
    } else if state.has_error() {
        Health::Stale
    } else {
        Health::Fresh
    };

    // The bar/text choice follows the last good value so a line keeps its
    // shape while stale.
    let shape = state.last_value();
    let drawn_as_bar = shape.is_some_and(|v| v.ratio().is_some());

    if health != Health::Fresh {
        let text = match health {
            Health::Degraded => format!(
                "{STALE_MARKER} after {} failures",
                state.consecutive_failures()
            ),
            _ => STALE_MARKER.to_string(),
        };
        return if drawn_as_bar {
            Primitive::Bar(BarLine {
                label,
                ratio: None,
                caption: text,
                health,
                trend: Vec::new(),
                average: None,
                peak: None,
            })
        } else {
            Primitive::Text(TextLine { label, text, health })
        };
    }

    // Fresh implies the latest reading is the newest history entry.
    let Some(value) = shape else {
        return Primitive::Text(TextLine {
            label,
            text: STALE_MARKER.to_string(),
            health: Health::Pending,
        });
    };

    match value.ratio() {
        Some(ratio) => {
            let history = state.history();
            Primitive::Bar(BarLine {
                label,
                ratio: Some(ratio),
                caption: format_value(value),
                health,
                trend: history.values(),
                average: history.summarize(Statistic::Average),
                peak: history.summarize(Statistic::Max),
            })
        }
        None => Primitive::Text(TextLine {
            label,
            text: format_value(value),
            health,
        }),
    }
}

/// Formats a value for display.
pub fn format_value(value: Value) -> String {
    match value {
        Value::Percent(p) => format!("{p:.1}%"),
        Value::Usage { used, total } => format!(
            "{} / {} ({:.1}%)",
            format_bytes(used),
            format_bytes(total),
            value.as_f64()
        ),
        Value::Gauge(v) => format!("{v:.2}"),
        Value::Rate(bytes_per_sec) => format_rate(bytes_per_sec),
        Value::Seconds(s) => format_uptime(s),
    }
}

/// Formats a byte count with binary units (`3.2 GiB`).
#[allow(clippy::cast_precision_loss)] // Display-only conversion
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Formats a throughput (`1.2 MiB/s`).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Rounded, clamped at zero
pub fn format_rate(bytes_per_sec: f64) -> String {
    let bytes = if bytes_per_sec.is_finite() {
        bytes_per_sec.max(0.0).round() as u64
    } else {
        0
    };
    format!("{}/s", format_bytes(bytes))
}

/// Formats seconds as `[Nd ]HH:MM:SS`.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    }
}

/// Builds a fill bar `width` cells wide. `None` draws an empty track.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)] // Ratio is clamped to 0..=1 and widths are small
pub fn fill_bar(ratio: Option<f64>, width: usize) -> String {
    let Some(ratio) = ratio else {
        return " ".repeat(width);
    };
    let filled = ((ratio.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Destination for rendered frames.
pub trait FrameSink {
    /// Draws one frame.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] if the output cannot be written. The event
    /// loop treats this as fatal.
    fn draw(&mut self, frame: &Frame) -> Result<(), RenderError>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn draw(&mut self, frame: &Frame) -> Result<(), RenderError> {
        (**self).draw(frame)
    }
}

/// Writes frames as plain text, separated by blank lines.
#[derive(Debug)]
pub struct TextSink<W> {
    out: W,
    bar_width: usize,
}

impl<W: Write> TextSink<W> {
    /// Creates a sink writing to `out` with 20-cell bars.
    pub fn new(out: W) -> Self {
        Self { out, bar_width: 20 }
    }

    /// Sets the bar width in cells.
    #[must_use]
    pub fn with_bar_width(mut self, bar_width: usize) -> Self {
        self.bar_width = bar_width;
        self
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameSink for TextSink<W> {
    fn draw(&mut self, frame: &Frame) -> Result<(), RenderError> {
        let text = frame.to_text(self.bar_width);
        writeln!(self.out, "{text}")
            .and_then(|()| self.out.flush())
            .map_err(|source| RenderError::Draw { source })
    }
}
