//! Keyboard and resize input for the full-screen dashboard.
//!
//! Crossterm's event reads block, so polling runs on a blocking thread and
//! hands translated events to the event loop with `blocking_send`. The loop
//! wakes every [`POLL_INTERVAL`] to notice cancellation.

use std::time::Duration;

use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil::event::{Event, EventSender, InputEvent};

/// How long one poll waits before re-checking cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Starts reading terminal input until `cancel` fires or the event loop
/// stops listening.
pub fn spawn(events: EventSender, cancel: CancellationToken) {
    tokio::task::spawn_blocking(move || poll_loop(&events, &cancel));
}

fn poll_loop(events: &EventSender, cancel: &CancellationToken) {
    while !cancel.is_cancelled() {
        let event = match event::poll(POLL_INTERVAL).and_then(|ready| ready.then(event::read).transpose()) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                // Without input there is no way to quit; stop the dashboard.
                warn!(error = %e, "terminal input failed");
                let _ = events.blocking_send(Event::Shutdown);
                return;
            }
        };

        if let Some(input) = translate(&event) {
            debug!(?input, "input");
            if events.blocking_send(Event::Input(input)).is_err() {
                return;
            }
        }
    }
}

/// Translates a terminal event into a dashboard input, if it is one.
pub fn translate(event: &TermEvent) -> Option<InputEvent> {
    match event {
        TermEvent::Key(key) if key.kind == KeyEventKind::Press => translate_key(*key),
        TermEvent::Resize(width, height) => Some(InputEvent::Resize(*width, *height)),
        _ => None,
    }
}

fn translate_key(key: KeyEvent) -> Option<InputEvent> {
    // Raw mode swallows SIGINT, so Ctrl+C arrives as a key.
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(InputEvent::Quit);
    }

    match key.code {
        KeyCode::Char('q' | 'Q') | KeyCode::Esc => Some(InputEvent::Quit),
        KeyCode::Char('p' | 'P') => Some(InputEvent::Pause),
        KeyCode::Char('r' | 'R') => Some(InputEvent::Redraw),
        _ => None,
    }
}
