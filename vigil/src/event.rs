//! Events consumed by the event loop.
//!
//! Every source of work (render timer, samplers, keyboard, signals) sends a
//! tagged [`Event`] into one bounded channel. The event loop is the single
//! consumer, so it handles exactly one event at a time in arrival order.

use tokio::sync::mpsc;

use crate::metric::{MetricId, Reading};

/// A unit of work for the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The render timer fired.
    Tick,
    /// A sampler finished one call.
    Reading(Reading),
    /// A metric became degraded or recovered.
    Status(StatusChange),
    /// The user pressed a key or resized the terminal.
    Input(InputEvent),
    /// The process was asked to stop (signal or closed input).
    Shutdown,
}

/// User input translated from terminal events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Stop the dashboard.
    Quit,
    /// Toggle frame output; sampling continues.
    Pause,
    /// Draw a frame now.
    Redraw,
    /// The terminal was resized to `(columns, rows)`.
    Resize(u16, u16),
}

/// A change in the failure status of one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// The metric reached its failure threshold.
    Degraded {
        /// The affected metric.
        metric: MetricId,
        /// Failures in a row when the threshold was reached.
        consecutive_failures: u32,
    },
    /// The metric produced a value after being degraded.
    Recovered {
        /// The affected metric.
        metric: MetricId,
    },
}

impl StatusChange {
    /// Returns the metric this change is about.
    pub fn metric(&self) -> &MetricId {
        match self {
            Self::Degraded { metric, .. } | Self::Recovered { metric } => metric,
        }
    }
}

/// Sending half of the event channel.
pub type EventSender = mpsc::Sender<Event>;

/// Receiving half of the event channel.
pub type EventReceiver = mpsc::Receiver<Event>;

/// Creates the bounded event channel. A capacity of zero is bumped to one.
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_preserves_order() {
        let (tx, mut rx) = channel(0);
        let cpu = MetricId::new("cpu.percent").unwrap();

        tx.send(Event::Tick).await.unwrap();
        let recv = rx.recv().await;
        assert_eq!(recv, Some(Event::Tick));

        let sender = tokio::spawn(async move {
            tx.send(Event::Input(InputEvent::Pause)).await.unwrap();
            tx.send(Event::Status(StatusChange::Recovered { metric: cpu })).await.unwrap();
        });

        assert_eq!(rx.recv().await, Some(Event::Input(InputEvent::Pause)));
        let Some(Event::Status(change)) = rx.recv().await else {
            panic!("expected a status event");
        };
        assert_eq!(change.metric().as_str(), "cpu.percent");
        sender.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
