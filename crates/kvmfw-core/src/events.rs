//! Event system for UI decoupling.
//!
//! A session publishes immutable snapshots of its progress through an
//! [`UpdateObserver`]. Events are delivered synchronously from the run's
//! worker thread, in the order they were produced.

use std::fmt;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

/// Lifecycle state of an update session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateState {
    /// Nothing running; ready to start.
    #[default]
    Idle,
    /// Resolving and downloading the image.
    Downloading,
    /// Writing the image to the EEPROM.
    Writing,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl UpdateState {
    /// Whether a run currently owns the session.
    pub fn is_active(&self) -> bool {
        matches!(self, UpdateState::Downloading | UpdateState::Writing)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Completed | UpdateState::Failed)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => write!(f, "Idle"),
            UpdateState::Downloading => write!(f, "Downloading"),
            UpdateState::Writing => write!(f, "Writing"),
            UpdateState::Completed => write!(f, "Completed"),
            UpdateState::Failed => write!(f, "Failed"),
        }
    }
}

/// Events emitted by an update session.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    /// Lifecycle transition.
    StateChanged { from: UpdateState, to: UpdateState },
    /// Human-readable phase description.
    Status { message: String },
    /// Merged progress; `percent` never decreases within a run.
    Progress { percent: u8, fraction: f64 },
    /// Exactly one per run.
    Completed {
        success: bool,
        error: Option<String>,
    },
}

/// Observer trait for receiving update events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait UpdateObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &UpdateEvent);
}

impl<T: UpdateObserver + ?Sized> UpdateObserver for std::sync::Arc<T> {
    fn on_event(&self, event: &UpdateEvent) {
        (**self).on_event(event)
    }
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UpdateObserver for NullObserver {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UpdateObserver for TracingObserver {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::StateChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "State changed");
            }
            UpdateEvent::Status { message } => {
                tracing::info!("{}", message);
            }
            UpdateEvent::Progress { percent, .. } => {
                tracing::debug!(progress = %format!("{}%", percent), "Progress");
            }
            UpdateEvent::Completed { success: true, .. } => {
                tracing::info!("Firmware update complete");
            }
            UpdateEvent::Completed {
                success: false,
                error,
            } => {
                tracing::error!(
                    "Firmware update failed: {}",
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
}

/// Observer that posts events to a bounded queue.
///
/// Sends block while the queue is full so no event is dropped; once the
/// receiver is gone, events are discarded.
pub struct ChannelObserver {
    sender: SyncSender<UpdateEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its queue.
    pub fn new(capacity: usize) -> (Self, Receiver<UpdateEvent>) {
        let (sender, receiver) = sync_channel(capacity);
        (Self { sender }, receiver)
    }
}

impl UpdateObserver for ChannelObserver {
    fn on_event(&self, event: &UpdateEvent) {
        let _ = self.sender.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_flags() {
        assert!(UpdateState::Downloading.is_active());
        assert!(UpdateState::Writing.is_active());
        assert!(!UpdateState::Idle.is_active());
        assert!(UpdateState::Failed.is_terminal());
        assert!(!UpdateState::Writing.is_terminal());
        assert_eq!(UpdateState::Writing.to_string(), "Writing");
    }

    #[test]
    fn test_channel_observer_preserves_order() {
        let (observer, rx) = ChannelObserver::new(8);
        observer.on_event(&UpdateEvent::Status {
            message: "one".into(),
        });
        observer.on_event(&UpdateEvent::Progress {
            percent: 10,
            fraction: 0.1,
        });
        drop(observer);

        let events: Vec<_> = rx.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], UpdateEvent::Status { message } if message == "one"));
        assert!(matches!(events[1], UpdateEvent::Progress { percent: 10, .. }));
    }

    #[test]
    fn test_channel_observer_after_receiver_dropped() {
        let (observer, rx) = ChannelObserver::new(1);
        drop(rx);
        observer.on_event(&UpdateEvent::Completed {
            success: true,
            error: None,
        });
    }
}
