//! Live progress broadcaster.
//!
//! One `tokio::sync::broadcast` channel per in-flight run, keyed by run id.
//! Subscribers receive every [`LogEvent`] published after they attach; a
//! subscriber that attaches late (or falls behind) gets a
//! [`RunLogMessage::CatchingUp`] marker instead of backfilled history.
//!
//! The channel belongs to a [`RunChannel`] guard held by the run. Dropping
//! the guard, on any exit path including a panic, removes the channel and
//! every subscriber observes a clean end of stream.

use crate::models::{LogEvent, LogLevel, OutletId, RunId};
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Item yielded by a run log subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RunLogMessage {
    /// Events were emitted that this subscriber will never see.
    CatchingUp { missed: u64 },
    Event(LogEvent),
}

/// Stream of messages for one run. Ends when the run reaches a terminal state.
pub type RunLogStream = BoxStream<'static, RunLogMessage>;

struct Channel {
    tx: broadcast::Sender<LogEvent>,
    // Guards send + count so a subscriber's `missed` is exact.
    emitted: Mutex<u64>,
}

/// Per-run publish/subscribe hub.
#[derive(Clone)]
pub struct Broadcaster {
    channels: Arc<DashMap<RunId, Arc<Channel>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open the channel for a run. It stays open until the guard is dropped.
    pub fn open(&self, outlet_id: &str, run_id: &str) -> RunChannel {
        let (tx, _) = broadcast::channel(self.capacity);
        self.channels.insert(
            run_id.to_string(),
            Arc::new(Channel {
                tx,
                emitted: Mutex::new(0),
            }),
        );
        debug!(%outlet_id, %run_id, "Opened run log channel");
        RunChannel {
            broadcaster: self.clone(),
            outlet_id: outlet_id.to_string(),
            run_id: run_id.to_string(),
        }
    }

    /// Publish to the event's run channel. No-op when the channel is closed.
    pub fn publish(&self, event: LogEvent) {
        let Some(channel) = self.channels.get(&event.run_id).map(|c| Arc::clone(&c)) else {
            return;
        };
        let mut emitted = channel.emitted.lock();
        // Err only means nobody is listening right now.
        let _ = channel.tx.send(event);
        *emitted += 1;
    }

    /// Attach to a run's log stream.
    ///
    /// Unknown or finished runs yield an immediately-closed, empty stream.
    pub fn subscribe(&self, run_id: &str) -> RunLogStream {
        let Some(channel) = self.channels.get(run_id).map(|c| Arc::clone(&c)) else {
            return stream::empty().boxed();
        };
        let (rx, missed) = {
            let emitted = channel.emitted.lock();
            (channel.tx.subscribe(), *emitted)
        };
        // Only the guard may keep the sender alive.
        drop(channel);

        let head = (missed > 0).then_some(RunLogMessage::CatchingUp { missed });
        let tail = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((RunLogMessage::Event(event), rx)),
                Err(RecvError::Lagged(missed)) => Some((RunLogMessage::CatchingUp { missed }, rx)),
                Err(RecvError::Closed) => None,
            }
        });
        stream::iter(head).chain(tail).boxed()
    }

    pub fn is_open(&self, run_id: &str) -> bool {
        self.channels.contains_key(run_id)
    }

    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }

    fn close(&self, run_id: &str) {
        if self.channels.remove(run_id).is_some() {
            debug!(%run_id, "Closed run log channel");
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Owning handle for one run's channel.
///
/// Every event emitted here is also written to `tracing` at the same level.
pub struct RunChannel {
    broadcaster: Broadcaster,
    outlet_id: OutletId,
    run_id: RunId,
}

impl RunChannel {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let (outlet_id, run_id) = (&self.outlet_id, &self.run_id);
        match level {
            LogLevel::Debug => debug!(%outlet_id, %run_id, "{message}"),
            LogLevel::Info => info!(%outlet_id, %run_id, "{message}"),
            LogLevel::Warn => warn!(%outlet_id, %run_id, "{message}"),
            LogLevel::Error => error!(%outlet_id, %run_id, "{message}"),
        }
        self.broadcaster.publish(LogEvent {
            outlet_id: self.outlet_id.clone(),
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(LogLevel::Error, message);
    }
}

impl Drop for RunChannel {
    fn drop(&mut self) {
        self.broadcaster.close(&self.run_id);
    }
}
