//! Event system for observing the transport.
//!
//! Lets callers (CLI, test harnesses) watch frames and exchange state
//! without the transport knowing about them.

use std::fmt;

use crate::device::HeciDeviceId;
use crate::protocol::HeciMessageHeader;
use crate::state::ExchangeState;

/// Frame direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx, // Host -> ME
    Rx, // ME -> Host
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Tx => write!(f, "TX"),
            FrameDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the transport.
#[derive(Debug, Clone)]
pub enum HeciEvent {
    /// Exchange state changed.
    StateChanged {
        device: HeciDeviceId,
        from: ExchangeState,
        to: ExchangeState,
    },
    /// A frame was written to or read from a ring.
    Frame {
        device: HeciDeviceId,
        direction: FrameDirection,
        header: HeciMessageHeader,
        /// First payload dwords, for tracing.
        data: Vec<u32>,
    },
    /// Frames discarded by `drain`.
    Drained { device: HeciDeviceId, frames: usize },
    /// Reset handshake completed.
    Reset { device: HeciDeviceId },
}

/// Observer trait for receiving transport events.
pub trait HeciObserver: Send + Sync {
    fn on_event(&self, event: &HeciEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl HeciObserver for NullObserver {
    fn on_event(&self, _event: &HeciEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl HeciObserver for TracingObserver {
    fn on_event(&self, event: &HeciEvent) {
        match event {
            HeciEvent::StateChanged { device, from, to } => {
                if to.is_error() {
                    tracing::debug!(device = %device, from = %from, to = %to, "Exchange failed");
                } else {
                    tracing::trace!(device = %device, from = %from, to = %to, "Exchange state");
                }
            }
            HeciEvent::Frame {
                device,
                direction,
                header,
                data,
            } => {
                tracing::trace!(
                    device = %device,
                    dir = %direction,
                    me = header.me_address(),
                    host = header.host_address(),
                    len = header.length(),
                    complete = header.message_complete(),
                    data = ?data,
                    "HECI frame"
                );
            }
            HeciEvent::Drained { device, frames } => {
                tracing::debug!(device = %device, frames = frames, "Discarded stale frames");
            }
            HeciEvent::Reset { device } => {
                tracing::info!(device = %device, "HECI reset complete");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Observer that records every event.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub events: Mutex<Vec<HeciEvent>>,
    }

    impl RecordingObserver {
        pub fn states(&self) -> Vec<ExchangeState> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    HeciEvent::StateChanged { to, .. } => Some(*to),
                    _ => None,
                })
                .collect()
        }

        pub fn frames(&self, direction: FrameDirection) -> Vec<HeciMessageHeader> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    HeciEvent::Frame {
                        direction: d,
                        header,
                        ..
                    } if *d == direction => Some(*header),
                    _ => None,
                })
                .collect()
        }
    }

    impl HeciObserver for RecordingObserver {
        fn on_event(&self, event: &HeciEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_recording_observer_filters_states() {
        let observer = RecordingObserver::default();
        observer.on_event(&HeciEvent::StateChanged {
            device: HeciDeviceId::Heci1,
            from: ExchangeState::Idle,
            to: ExchangeState::Sending,
        });
        observer.on_event(&HeciEvent::Drained {
            device: HeciDeviceId::Heci1,
            frames: 2,
        });
        assert_eq!(observer.states(), vec![ExchangeState::Sending]);
    }
}
