//! Event system for UI decoupling.
//!
//! Allows CLI/TUI front ends to follow device and transfer activity without
//! tight coupling to the session internals.

use std::fmt;

use crate::protocol::CommandCode;
use crate::session::DeviceId;

/// Bulk transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host -> Device
    Out,
    /// Device -> Host
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "OUT"),
            Direction::In => write!(f, "IN"),
        }
    }
}

/// Events emitted by devices and sessions.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Device recognised and buffers allocated.
    Attached { id: DeviceId },
    /// Device removed. `deferred` is set when buffer release waits for close.
    Detached { id: DeviceId, deferred: bool },
    /// Session opened on the discovered endpoints.
    Opened { bulk_in: u8, bulk_out: u8 },
    /// Session closed. `released` is set when this close freed the buffers.
    Closed { released: bool },
    /// One chunk fully transferred.
    Chunk {
        direction: Direction,
        offset: usize,
        length: usize,
    },
    /// The device stalled; the engine is backing off.
    Stall {
        direction: Direction,
        attempt: u32,
        max: u32,
    },
    /// A control command was dispatched.
    Command { code: CommandCode },
}

/// Observer trait for receiving transfer events.
///
/// Implement this trait in your UI layer to receive updates. Events are
/// emitted while the session lock is held, so observers must not call back
/// into the session.
pub trait TransferObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &TransferEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl TransferObserver for NullObserver {
    fn on_event(&self, _event: &TransferEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::Attached { id } => {
                tracing::info!(device = %id, "USB aw attached");
            }
            TransferEvent::Detached { id, deferred } => {
                tracing::info!(device = %id, deferred, "USB aw disconnected");
            }
            TransferEvent::Opened { bulk_in, bulk_out } => {
                tracing::debug!(
                    bulk_in = %format!("0x{:02X}", bulk_in),
                    bulk_out = %format!("0x{:02X}", bulk_out),
                    "Session opened"
                );
            }
            TransferEvent::Closed { released } => {
                tracing::debug!(released, "Session closed");
            }
            TransferEvent::Chunk {
                direction,
                offset,
                length,
            } => {
                tracing::trace!(dir = %direction, offset, len = length, "Chunk complete");
            }
            TransferEvent::Stall {
                direction,
                attempt,
                max,
            } => {
                tracing::warn!(dir = %direction, attempt, max, "NAK, holding off");
            }
            TransferEvent::Command { code } => {
                tracing::debug!(code = %code, "ioctl");
            }
        }
    }
}
