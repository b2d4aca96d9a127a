//! Identifiers, simulation clock and other types shared by all components.

use std::fmt::{Display, Formatter};

use serde::Serialize;

/// Default minimum time between two consecutive events.
pub const DEFAULT_MIN_TIME_BETWEEN_EVENTS: f64 = 0.01;

/// Number of instructions in one MI (million instructions).
pub const MILLION: f64 = 1_000_000.;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        pub struct $name(pub u32);

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }
    };
}

typed_id!(
    /// Identifier of a physical host.
    HostId,
    "host"
);
typed_id!(
    /// Identifier of a guest (virtual machine or nested container).
    GuestId,
    "guest"
);
typed_id!(
    /// Identifier of a cloudlet.
    CloudletId,
    "cloudlet"
);
typed_id!(
    /// Identifier of a processing element, unique within its owner.
    PeId,
    "pe"
);

/// Current simulation time together with the minimum allowed distance between events.
///
/// The clock is passed into every time-dependent call, so that all entities updated during one tick observe the same
/// time value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationClock {
    time: f64,
    min_time_between_events: f64,
}

impl SimulationClock {
    /// Creates clock at the given time with the default minimum time between events.
    pub fn new(time: f64) -> Self {
        Self::with_min_time_between_events(time, DEFAULT_MIN_TIME_BETWEEN_EVENTS)
    }

    /// Creates clock at the given time with the specified minimum time between events.
    pub fn with_min_time_between_events(time: f64, min_time_between_events: f64) -> Self {
        Self {
            time,
            min_time_between_events,
        }
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Returns the minimum time between two consecutive events.
    pub fn min_time_between_events(&self) -> f64 {
        self.min_time_between_events
    }

    /// Returns the clock moved to the given time.
    pub fn at(&self, time: f64) -> Self {
        Self {
            time,
            min_time_between_events: self.min_time_between_events,
        }
    }
}

/// Reason of a wake-up requested from the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WakeupTag {
    /// Cloudlet processing should be updated.
    CloudletProcessing,
    /// Migration of the guest should be committed.
    MigrationCommit(GuestId),
}

/// Wake-up request issued to the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Wakeup {
    pub entity: u32,
    pub delay: f64,
    pub tag: WakeupTag,
}

/// Interface of the external event loop used to schedule future processing.
pub trait WakeupScheduler {
    /// Requests the entity to be woken up after `delay` with the given tag.
    fn schedule_wakeup(&mut self, entity: u32, delay: f64, tag: WakeupTag);
}

impl WakeupScheduler for Vec<Wakeup> {
    fn schedule_wakeup(&mut self, entity: u32, delay: f64, tag: WakeupTag) {
        self.push(Wakeup { entity, delay, tag });
    }
}

/// Returns the earliest of two optional event times.
pub fn earliest(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
