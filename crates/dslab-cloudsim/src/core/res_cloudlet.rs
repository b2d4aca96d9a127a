//! Execution state of a cloudlet inside a cloudlet scheduler.

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::common::{CloudletId, PeId, MILLION};

/// Wraps a cloudlet while it resides in a cloudlet scheduler.
///
/// Keeps the PEs assigned to the cloudlet and the time accounting across pause/resume cycles.
/// The record is created on submission and dropped when the cloudlet leaves the scheduler.
pub struct ResCloudlet {
    cloudlet: Cloudlet,
    arrival_time: f64,
    start_exec_time: f64,
    total_completion_time: f64,
    pe_ids: Vec<PeId>,
}

impl ResCloudlet {
    pub fn new(mut cloudlet: Cloudlet, arrival_time: f64) -> Self {
        cloudlet.start_record(arrival_time);
        Self {
            cloudlet,
            arrival_time,
            start_exec_time: 0.,
            total_completion_time: 0.,
            pe_ids: Vec::new(),
        }
    }

    pub fn id(&self) -> CloudletId {
        self.cloudlet.id()
    }

    pub fn pes(&self) -> u32 {
        self.cloudlet.pes()
    }

    pub fn cloudlet(&self) -> &Cloudlet {
        &self.cloudlet
    }

    pub fn status(&self) -> CloudletStatus {
        self.cloudlet.status()
    }

    pub fn arrival_time(&self) -> f64 {
        self.arrival_time
    }

    pub fn start_exec_time(&self) -> f64 {
        self.start_exec_time
    }

    /// Returns the time spent in execution before the current execution interval.
    pub fn total_completion_time(&self) -> f64 {
        self.total_completion_time
    }

    /// Returns guest PEs assigned to the cloudlet.
    pub fn pe_ids(&self) -> &[PeId] {
        &self.pe_ids
    }

    pub(crate) fn assign_pes(&mut self, pe_ids: Vec<PeId>) {
        self.pe_ids = pe_ids;
    }

    /// Changes cloudlet status and updates time accounting. Returns false if the transition is not allowed.
    pub fn set_status(&mut self, status: CloudletStatus, time: f64) -> bool {
        let prev_status = self.cloudlet.status();
        if !self.cloudlet.set_status(status) {
            return false;
        }
        if prev_status == CloudletStatus::InExec && status != CloudletStatus::InExec {
            self.total_completion_time += time - self.start_exec_time;
        }
        if status == CloudletStatus::InExec {
            self.start_exec_time = time;
            self.cloudlet.mark_exec_start(time);
        }
        if status.is_terminal() {
            self.cloudlet.mark_finished(time);
        }
        true
    }

    /// Returns the remaining number of instructions.
    pub fn remaining_instructions(&self) -> u64 {
        let total = self.cloudlet.total_length() * MILLION as u64;
        total.saturating_sub(self.cloudlet.finished_instructions())
    }

    /// Returns the remaining length in whole MI (partially processed MI are not counted).
    pub fn remaining_length(&self) -> u64 {
        self.remaining_instructions() / MILLION as u64
    }

    /// Adds processed instructions.
    pub fn update_finished_so_far(&mut self, instructions: u64) {
        self.cloudlet.add_finished_instructions(instructions);
    }

    /// Inflates cloudlet length by the given number of MI per PE.
    pub(crate) fn extend_length(&mut self, extra: u64) {
        let length = self.cloudlet.length() + extra;
        self.cloudlet.set_length(length);
    }

    /// Closes the execution record of the cloudlet before it leaves the scheduler.
    pub fn finalize(&mut self, time: f64) {
        let mut cpu_time = self.total_completion_time;
        if self.cloudlet.status() == CloudletStatus::InExec {
            cpu_time += time - self.start_exec_time;
        }
        self.cloudlet.close_record(time - self.arrival_time, cpu_time);
    }

    pub fn into_cloudlet(self) -> Cloudlet {
        self.cloudlet
    }
}
