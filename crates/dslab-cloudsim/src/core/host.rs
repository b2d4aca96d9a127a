//! Physical host model.

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::common::{HostId, SimulationClock};
use crate::core::error::ConfigError;
use crate::core::guest::UTILIZATION_HISTORY_LENGTH;
use crate::core::guest_host::{GuestHost, GuestHostingState};
use crate::core::guest_scheduler::{GuestScheduler, GuestSchedulerKind};
use crate::core::pe::{total_mips, ProcessingElement};

/// Host state recorded after each processing update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostStateHistoryEntry {
    pub time: f64,
    pub allocated_mips: f64,
    pub requested_mips: f64,
    pub is_active: bool,
}

/// Physical machine with a fixed set of PEs, RAM, bandwidth and storage.
pub struct Host {
    id: HostId,
    hosting: GuestHostingState,
    failed: bool,
    state_history: Vec<HostStateHistoryEntry>,
    utilization_history: VecDeque<f64>,
}

impl Host {
    pub fn new(
        id: HostId,
        pes: Vec<ProcessingElement>,
        ram: u64,
        bw: u64,
        storage: u64,
        scheduler: GuestSchedulerKind,
    ) -> Result<Self, ConfigError> {
        if pes.is_empty() {
            return Err(ConfigError::NoProcessingElements { entity: id.to_string() });
        }
        Ok(Self {
            id,
            hosting: GuestHostingState::new(scheduler.build(pes), ram, bw, storage),
            failed: false,
            state_history: Vec::new(),
            utilization_history: VecDeque::new(),
        })
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn state(&self) -> &GuestHostingState {
        &self.hosting
    }

    pub fn scheduler(&self) -> &dyn GuestScheduler {
        self.hosting.scheduler()
    }

    pub fn pes(&self) -> &[ProcessingElement] {
        self.hosting.scheduler.pes()
    }

    pub fn total_mips(&self) -> f64 {
        total_mips(self.pes())
    }

    pub fn ram(&self) -> u64 {
        self.hosting.ram.capacity()
    }

    pub fn bw(&self) -> u64 {
        self.hosting.bw.capacity()
    }

    pub fn storage(&self) -> u64 {
        self.hosting.storage
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Marks host as failed, failed hosts don't accept guests.
    pub fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
    }

    /// Returns MIPS currently allocated to resident guests.
    pub fn utilization_mips(&self) -> f64 {
        self.hosting
            .guests
            .iter()
            .map(|guest| self.hosting.scheduler.total_allocated_mips_for(*guest))
            .sum()
    }

    /// Returns the fraction of the host capacity allocated to resident guests.
    pub fn utilization(&self) -> f64 {
        self.utilization_mips() / self.total_mips()
    }

    pub fn state_history(&self) -> &[HostStateHistoryEntry] {
        &self.state_history
    }

    /// Returns recent utilization samples, oldest first.
    pub fn utilization_history(&self) -> &VecDeque<f64> {
        &self.utilization_history
    }
}

impl GuestHost for Host {
    fn label(&self) -> String {
        self.id.to_string()
    }

    fn hosting(&self) -> Option<&GuestHostingState> {
        Some(&self.hosting)
    }

    fn hosting_mut(&mut self) -> Option<&mut GuestHostingState> {
        Some(&mut self.hosting)
    }

    fn is_failed(&self) -> bool {
        self.failed
    }

    fn on_guests_processed(&mut self, clock: &SimulationClock, allocated_mips: f64, requested_mips: f64) {
        let entry = HostStateHistoryEntry {
            time: clock.time(),
            allocated_mips,
            requested_mips,
            is_active: !self.hosting.guests.is_empty(),
        };
        match self.state_history.last_mut() {
            Some(last) if last.time == entry.time => *last = entry,
            _ => self.state_history.push(entry),
        }
        self.utilization_history.push_back(allocated_mips / self.total_mips());
        if self.utilization_history.len() > UTILIZATION_HISTORY_LENGTH {
            self.utilization_history.pop_front();
        }
    }
}
