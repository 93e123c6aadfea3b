//! The single-threaded event loop.
//!
//! [`EventLoop`] owns the [`Aggregator`], the [`Renderer`] and the frame sink.
//! It consumes one [`Event`] at a time from the fan-in channel, so merges and
//! renders never overlap and the renderer only ever sees one snapshot.
//!
//! | Event               | Effect |
//! |---------------------|--------|
//! | `Tick`              | draw a frame if state changed since the last one and not paused |
//! | `Reading`           | merge into the aggregator |
//! | `Status`            | log the change |
//! | `Input(Pause)`      | toggle frame output; sampling continues |
//! | `Input(Redraw)`     | draw now |
//! | `Input(Resize)`     | draw now |
//! | `Input(Quit)`       | stop |
//! | `Shutdown`          | stop |
//!
//! Once stopped, the loop draws nothing more.

use tracing::{debug, info, warn};

use crate::aggregator::{Aggregator, MergeOutcome};
use crate::error::Result;
use crate::event::{Event, EventReceiver, InputEvent, StatusChange};
use crate::render::{Frame, FrameSink, Renderer};
use crate::snapshot::Snapshot;

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The user asked to quit.
    Quit,
    /// A shutdown request (signal or closed input) arrived.
    Shutdown,
    /// Every event sender was dropped.
    ChannelClosed,
}

/// What the caller should do after handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Keep consuming events.
    Continue,
    /// Stop; no further frames will be drawn.
    Exit(ExitReason),
}

/// Serializes input, timer and sampler events.
#[derive(Debug)]
pub struct EventLoop<S> {
    aggregator: Aggregator,
    renderer: Renderer,
    sink: S,
    /// State changed since the last drawn frame.
    dirty: bool,
    paused: bool,
    /// Last frame drawn, reused while paused.
    last_frame: Option<Frame>,
    frames_rendered: u64,
    exited: Option<ExitReason>,
}

impl<S: FrameSink> EventLoop<S> {
    /// Creates a loop that draws to `sink`. The first tick always draws.
    pub fn new(aggregator: Aggregator, renderer: Renderer, sink: S) -> Self {
        Self {
            aggregator,
            renderer,
            sink,
            dirty: true,
            paused: false,
            last_frame: None,
            frames_rendered: 0,
            exited: None,
        }
    }

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`](crate::error::RenderError) if the sink fails
    /// to draw. The loop is unusable afterwards.
    pub fn handle(&mut self, event: Event) -> Result<Control> {
        if let Some(reason) = self.exited {
            debug!(?event, "ignoring event after exit");
            return Ok(Control::Exit(reason));
        }

        match event {
            Event::Tick => {
                if self.dirty && !self.paused {
                    self.draw_current()?;
                }
            }
            Event::Reading(reading) => {
                let outcome = self.aggregator.merge(reading);
                if outcome.is_applied() {
                    self.dirty = true;
                }
                if let MergeOutcome::Degraded { consecutive_failures } = outcome {
                    debug!(consecutive_failures, "merge crossed failure threshold");
                }
            }
            Event::Status(change) => match change {
                StatusChange::Degraded {
                    metric,
                    consecutive_failures,
                } => warn!(metric = %metric, consecutive_failures, "metric degraded"),
                StatusChange::Recovered { metric } => info!(metric = %metric, "metric recovered"),
            },
            Event::Input(InputEvent::Pause) => {
                self.paused = !self.paused;
                info!(paused = self.paused, "toggled pause");
                if self.paused {
                    self.redraw_last()?;
                } else {
                    self.draw_current()?;
                }
            }
            Event::Input(InputEvent::Redraw | InputEvent::Resize(..)) => {
                if self.paused {
                    self.redraw_last()?;
                } else {
                    self.draw_current()?;
                }
            }
            Event::Input(InputEvent::Quit) => return Ok(self.exit(ExitReason::Quit)),
            Event::Shutdown => return Ok(self.exit(ExitReason::Shutdown)),
        }

        Ok(Control::Continue)
    }

    /// Consumes events until the loop exits or the channel closes.
    ///
    /// # Errors
    ///
    /// Returns the first render error.
    pub async fn run(&mut self, events: &mut EventReceiver) -> Result<ExitReason> {
        while let Some(event) = events.recv().await {
            if let Control::Exit(reason) = self.handle(event)? {
                return Ok(reason);
            }
        }
        self.exit(ExitReason::ChannelClosed);
        Ok(ExitReason::ChannelClosed)
    }

    fn exit(&mut self, reason: ExitReason) -> Control {
        info!(?reason, frames = self.frames_rendered, "event loop stopped");
        self.exited = Some(reason);
        Control::Exit(reason)
    }

    fn draw_current(&mut self) -> Result<()> {
        let mut frame = self.renderer.render(&self.aggregator.snapshot());
        frame.paused = self.paused;
        self.sink.draw(&frame)?;
        self.frames_rendered += 1;
        self.dirty = false;
        self.last_frame = Some(frame);
        Ok(())
    }

    fn redraw_last(&mut self) -> Result<()> {
        let Some(mut frame) = self.last_frame.take() else {
            return self.draw_current();
        };
        frame.paused = self.paused;
        let drawn = self.sink.draw(&frame);
        self.last_frame = Some(frame);
        drawn?;
        self.frames_rendered += 1;
        Ok(())
    }

    /// Returns a snapshot of the current aggregated state.
    pub fn snapshot(&self) -> Snapshot {
        self.aggregator.snapshot()
    }

    /// Returns the number of frames drawn so far.
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Returns whether frame output is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns why the loop stopped, if it has.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.exited
    }

    /// Returns the frame sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consumes the loop and returns the frame sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}
