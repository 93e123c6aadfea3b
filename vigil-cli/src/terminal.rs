//! Full-screen frame sink on ratatui and crossterm.
//!
//! [`TerminalSink`] owns the terminal for its whole lifetime: it enters raw
//! mode and the alternate screen on creation and restores both on drop. A
//! panic hook restores the terminal too, so a panic message is readable.

use std::io::{self, Stdout};
use std::sync::Once;

use crossterm::cursor::{Hide, Show};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Gauge, Paragraph, Sparkline};
use tracing::warn;
use vigil::error::RenderError;
use vigil::render::{BarLine, Frame, FrameSink, Health, Primitive, TextLine};

/// Key help shown on the last row.
const HELP: &str = " q quit   p pause   r redraw";

/// Columns given to the trend sparkline.
const TREND_WIDTH: u16 = 24;

/// Columns given to the average/peak summary.
const SUMMARY_WIDTH: u16 = 24;

/// Draws frames to the terminal's alternate screen.
pub struct TerminalSink {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSink {
    /// Takes over the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::TerminalUnavailable`] if stdout is not a
    /// terminal or cannot be switched to raw mode.
    pub fn new() -> Result<Self, RenderError> {
        install_panic_hook();

        enable_raw_mode().map_err(unavailable)?;
        let mut stdout = io::stdout();
        if let Err(source) = execute!(stdout, EnterAlternateScreen, Hide) {
            let _ = restore_terminal();
            return Err(unavailable(source));
        }

        match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => Ok(Self { terminal }),
            Err(source) => {
                let _ = restore_terminal();
                Err(unavailable(source))
            }
        }
    }
}

impl FrameSink for TerminalSink {
    fn draw(&mut self, frame: &Frame) -> Result<(), RenderError> {
        self.terminal
            .draw(|f| draw_frame(f, frame))
            .map(|_| ())
            .map_err(|source| RenderError::Draw { source })
    }
}

impl Drop for TerminalSink {
    fn drop(&mut self) {
        if let Err(e) = restore_terminal() {
            warn!(error = %e, "failed to restore terminal");
        }
    }
}

fn unavailable(source: io::Error) -> RenderError {
    RenderError::TerminalUnavailable { source }
}

fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen, Show)
}

fn install_panic_hook() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = restore_terminal();
            default_hook(info);
        }));
    });
}

/// Lays out a frame: title and host rows, one row per metric, key help at
/// the bottom.
fn draw_frame(f: &mut ratatui::Frame, frame: &Frame) {
    let mut constraints = Vec::with_capacity(frame.lines.len() + 3);
    constraints.push(Constraint::Length(2));
    constraints.extend(frame.lines.iter().map(|_| Constraint::Length(1)));
    constraints.push(Constraint::Min(0));
    constraints.push(Constraint::Length(1));

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(f.area());

    let mut header = vec![title_line(frame)];
    if let Some(host) = &frame.host {
        header.push(Line::styled(format!(" {}", host.summary()), Style::default().fg(Color::DarkGray)));
    }
    f.render_widget(Paragraph::new(header), rows[0]);

    let label_width = frame
        .lines
        .iter()
        .map(|line| line.label().chars().count())
        .max()
        .map_or(0, |w| u16::try_from(w).unwrap_or(u16::MAX));

    for (line, row) in frame.lines.iter().zip(rows.iter().skip(1)) {
        match line {
            Primitive::Bar(bar) => draw_bar(f, *row, bar, label_width),
            Primitive::Text(text) => draw_text(f, *row, text, label_width),
        }
    }

    if let Some(help) = rows.last() {
        f.render_widget(
            Paragraph::new(HELP).style(Style::default().fg(Color::DarkGray)),
            *help,
        );
    }
}

fn title_line(frame: &Frame) -> Line<'static> {
    let mut spans = vec![Span::styled(
        format!(" {}", frame.title),
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )];
    if frame.paused {
        spans.push(Span::styled(
            " [paused]",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
    }
    Line::from(spans)
}

fn draw_bar(f: &mut ratatui::Frame, area: Rect, bar: &BarLine, label_width: u16) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(label_width.saturating_add(2)),
            Constraint::Min(10),
            Constraint::Length(1),
            Constraint::Length(TREND_WIDTH),
            Constraint::Length(SUMMARY_WIDTH),
        ])
        .split(area);

    let style = health_style(bar.health);
    f.render_widget(label(&bar.label, bar.health), columns[0]);

    // Gauge panics on ratios outside 0..=1.
    match bar.ratio.filter(|r| r.is_finite()) {
        Some(ratio) => f.render_widget(
            Gauge::default()
                .gauge_style(style)
                .ratio(ratio.clamp(0.0, 1.0))
                .label(bar.caption.clone()),
            columns[1],
        ),
        None => f.render_widget(Paragraph::new(bar.caption.clone()).style(style), columns[1]),
    }

    let points = trend_points(&bar.trend);
    f.render_widget(Sparkline::default().data(&points).style(style), columns[3]);

    if let (Some(average), Some(peak)) = (bar.average, bar.peak) {
        f.render_widget(
            Paragraph::new(format!(" avg {average:.1} peak {peak:.1}"))
                .style(Style::default().fg(Color::DarkGray)),
            columns[4],
        );
    }
}

fn draw_text(f: &mut ratatui::Frame, area: Rect, text: &TextLine, label_width: u16) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(label_width.saturating_add(2)), Constraint::Min(0)])
        .split(area);

    f.render_widget(label(&text.label, text.health), columns[0]);
    f.render_widget(
        Paragraph::new(text.text.clone()).style(health_style(text.health)),
        columns[1],
    );
}

fn label(text: &str, health: Health) -> Paragraph<'static> {
    let style = match health {
        Health::Fresh => Style::default().fg(Color::White),
        _ => health_style(health),
    };
    Paragraph::new(format!(" {text}")).style(style)
}

fn health_style(health: Health) -> Style {
    match health {
        Health::Fresh => Style::default().fg(Color::Green),
        Health::Pending => Style::default().fg(Color::DarkGray),
        Health::Stale => Style::default().fg(Color::Yellow),
        Health::Degraded => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

/// Scales history values to sparkline points, keeping the newest that fit.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to 0..=1000
fn trend_points(trend: &[f64]) -> Vec<u64> {
    let skip = trend.len().saturating_sub(usize::from(TREND_WIDTH));
    let window = &trend[skip..];

    let peak = window.iter().copied().filter(|v| v.is_finite()).fold(0.0_f64, f64::max);
    if peak <= 0.0 {
        return vec![0; window.len()];
    }

    window
        .iter()
        .map(|v| {
            if v.is_finite() {
                (v / peak * 1000.0).clamp(0.0, 1000.0).round() as u64
            } else {
                0
            }
        })
        .collect()
}
