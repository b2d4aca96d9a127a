//! Time-shared cloudlet scheduler.

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::cloudlet_scheduler::{
    add_file_transfer_length, admit_record, estimate_finish_time, share_capacity, Admission, CloudletQueues,
    CloudletScheduler,
};
use crate::core::common::{CloudletId, PeId, SimulationClock};
use crate::core::res_cloudlet::ResCloudlet;

/// All active cloudlets share the guest capacity, cloudlets are never queued.
///
/// The capacity per PE is the total share divided by the number of guest PEs with non-zero share, or by the number
/// of PEs requested by active cloudlets if it is larger. A cloudlet is processed at the capacity per PE multiplied
/// by the number of its PEs.
#[derive(Default)]
pub struct TimeSharedScheduler {
    queues: CloudletQueues,
}

impl TimeSharedScheduler {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the capacity per PE available to each active cloudlet.
    pub fn capacity(&self) -> f64 {
        capacity_per_pe(&self.queues.current_mips_share, self.queues.used_pes())
    }
}

fn capacity_per_pe(mips_share: &[f64], pes_in_use: u32) -> f64 {
    let (capacity, cpus) = share_capacity(mips_share);
    let divisor = cpus.max(pes_in_use);
    if divisor == 0 {
        return 0.;
    }
    capacity / divisor as f64
}

impl CloudletScheduler for TimeSharedScheduler {
    fn submit(&mut self, cloudlet: Cloudlet, file_transfer_time: f64, clock: &SimulationClock) -> Admission {
        let mut rcl = match admit_record(cloudlet, clock.time()) {
            Some(rcl) => rcl,
            None => return Admission::Rejected,
        };
        if !rcl.set_status(CloudletStatus::InExec, clock.time()) {
            return Admission::Rejected;
        }
        rcl.assign_pes((0..rcl.pes()).map(PeId).collect());

        let capacity = capacity_per_pe(&self.queues.current_mips_share, self.queues.used_pes() + rcl.pes());
        let mips = capacity * rcl.pes() as f64;
        add_file_transfer_length(&mut rcl, mips, file_transfer_time);
        let predicted = estimate_finish_time(&rcl, mips, clock);
        self.queues.exec.push(rcl);
        Admission::Running(predicted)
    }

    fn update_processing(&mut self, clock: &SimulationClock, mips_share: &[f64]) -> Option<f64> {
        self.queues.current_mips_share = mips_share.to_vec();
        let capacity = self.capacity();
        self.queues.advance(clock.time(), |rcl| capacity * rcl.pes() as f64);

        if self.queues.exec.is_empty() {
            self.queues.previous_time = clock.time();
            return None;
        }

        self.queues.complete_finished(clock.time());
        let capacity = self.capacity();
        let next_event = self.queues.next_event(clock, |rcl| capacity * rcl.pes() as f64);
        self.queues.previous_time = clock.time();
        next_event
    }

    fn resume(&mut self, id: CloudletId, clock: &SimulationClock) -> Option<Admission> {
        let mut rcl = self.queues.take_paused(id)?;
        rcl.set_status(CloudletStatus::Resumed, clock.time());
        rcl.set_status(CloudletStatus::InExec, clock.time());
        let capacity = capacity_per_pe(&self.queues.current_mips_share, self.queues.used_pes() + rcl.pes());
        let predicted = estimate_finish_time(&rcl, capacity * rcl.pes() as f64, clock);
        self.queues.exec.push(rcl);
        Some(Admission::Running(predicted))
    }

    fn allocated_mips_for(&self, rcl: &ResCloudlet, _time: f64) -> f64 {
        self.capacity() * rcl.pes() as f64
    }

    fn queues(&self) -> &CloudletQueues {
        &self.queues
    }

    fn queues_mut(&mut self) -> &mut CloudletQueues {
        &mut self.queues
    }
}
