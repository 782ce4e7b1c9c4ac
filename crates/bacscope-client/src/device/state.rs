//! Device lifecycle as a pure transition function.
//!
//! The device applies [`transition`] to its current state and then carries
//! out the returned [`Effect`]s itself; nothing here touches the network.

use std::fmt;

/// Consecutive ping failures after which a device is considered gone.
pub const MAX_PING_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Disconnected,
    /// Connected, reading one property per request.
    ConnectedRp,
    /// Connected, batching reads with ReadPropertyMultiple.
    ConnectedRpm,
    /// Offline, serving values from a saved snapshot.
    FromDb,
}

impl DeviceState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedRp | Self::ConnectedRpm)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::ConnectedRp => "connected (read property)",
            Self::ConnectedRpm => "connected (read property multiple)",
            Self::FromDb => "from database",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// objectName and segmentationSupported were read.
    Connected { segmentation_supported: bool },
    /// The device did not answer the connection reads.
    NoResponse { snapshot_available: bool },
    /// ReadPropertyMultiple failed even with one object per request.
    SegmentationRefused,
    PingFailed { consecutive: u32 },
    /// The caller asked to go offline.
    Disconnect { snapshot_available: bool },
    /// A snapshot was loaded.
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    DiscoverPoints,
    StartPolling,
    StopPolling,
    LoadSnapshot,
}

/// Next state and the effects the device must carry out, in order.
pub fn transition(state: DeviceState, event: Event) -> (DeviceState, Vec<Effect>) {
    use DeviceState::*;

    match (state, event) {
        (Disconnected | FromDb, Event::Connected { segmentation_supported }) => {
            let next = if segmentation_supported { ConnectedRpm } else { ConnectedRp };
            let mut effects = Vec::with_capacity(2);
            if state == FromDb {
                effects.push(Effect::StopPolling);
            }
            effects.push(Effect::DiscoverPoints);
            effects.push(Effect::StartPolling);
            (next, effects)
        }
        (Disconnected, Event::NoResponse { snapshot_available: true }) => (FromDb, vec![Effect::LoadSnapshot]),
        (Disconnected, Event::NoResponse { snapshot_available: false }) => (Disconnected, Vec::new()),
        (ConnectedRpm, Event::SegmentationRefused) => (ConnectedRp, Vec::new()),
        (ConnectedRp | ConnectedRpm, Event::PingFailed { consecutive }) if consecutive >= MAX_PING_FAILURES => {
            (Disconnected, vec![Effect::StopPolling])
        }
        (ConnectedRp | ConnectedRpm, Event::Disconnect { snapshot_available }) => {
            if snapshot_available {
                (FromDb, vec![Effect::StopPolling, Effect::LoadSnapshot])
            } else {
                (Disconnected, vec![Effect::StopPolling])
            }
        }
        (FromDb, Event::Disconnect { .. }) => (Disconnected, Vec::new()),
        (_, Event::Restored) => (FromDb, vec![Effect::StopPolling]),
        (state, _) => (state, Vec::new()),
    }
}
