//! Space-shared cloudlet scheduler.

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::cloudlet_scheduler::{
    add_file_transfer_length, admit_record, estimate_finish_time, share_capacity, Admission, CloudletQueues,
    CloudletScheduler,
};
use crate::core::common::{CloudletId, PeId, SimulationClock};
use crate::core::res_cloudlet::ResCloudlet;

/// Each active cloudlet occupies dedicated guest PEs until it leaves the scheduler.
///
/// A submitted cloudlet starts right away if there are enough free PEs for it, otherwise it waits in a FIFO queue.
/// Waiting cloudlets are started from the head of the queue for as long as the head fits into the free PEs.
#[derive(Default)]
pub struct SpaceSharedScheduler {
    queues: CloudletQueues,
}

impl SpaceSharedScheduler {
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the capacity of a single guest PE.
    pub fn capacity(&self) -> f64 {
        let (capacity, cpus) = share_capacity(&self.queues.current_mips_share);
        if cpus == 0 {
            return 0.;
        }
        capacity / cpus as f64
    }

    /// Returns the number of guest PEs not occupied by active cloudlets.
    pub fn free_pes(&self) -> u32 {
        let (_, cpus) = share_capacity(&self.queues.current_mips_share);
        cpus.saturating_sub(self.queues.used_pes())
    }

    fn fits(&self, rcl: &ResCloudlet) -> bool {
        self.free_pes() >= rcl.pes()
    }

    fn free_pe_ids(&self, count: u32) -> Vec<PeId> {
        let (_, cpus) = share_capacity(&self.queues.current_mips_share);
        let busy: Vec<PeId> = self
            .queues
            .exec
            .iter()
            .flat_map(|rcl| rcl.pe_ids().iter().copied())
            .collect();
        (0..cpus)
            .map(PeId)
            .filter(|pe| !busy.contains(pe))
            .take(count as usize)
            .collect()
    }

    fn start(&mut self, mut rcl: ResCloudlet, clock: &SimulationClock) -> Option<f64> {
        let pe_ids = self.free_pe_ids(rcl.pes());
        rcl.assign_pes(pe_ids);
        rcl.set_status(CloudletStatus::InExec, clock.time());
        let estimate = estimate_finish_time(&rcl, self.capacity() * rcl.pes() as f64, clock);
        self.queues.exec.push(rcl);
        estimate
    }

    /// Starts the head of the waiting queue if it fits into the free PEs.
    fn promote_next(&mut self, clock: &SimulationClock) -> bool {
        match self.queues.waiting.front() {
            Some(head) if self.fits(head) => {}
            _ => return false,
        }
        if let Some(rcl) = self.queues.waiting.pop_front() {
            self.start(rcl, clock);
            return true;
        }
        false
    }

    /// Starts waiting cloudlets while the head of the queue fits. Returns the number of started cloudlets.
    fn promote_waiting(&mut self, clock: &SimulationClock) -> usize {
        let mut started = 0;
        while self.promote_next(clock) {
            started += 1;
        }
        started
    }

    fn is_running(&self, id: CloudletId) -> bool {
        self.queues.exec.iter().any(|rcl| rcl.id() == id)
    }
}

impl CloudletScheduler for SpaceSharedScheduler {
    fn submit(&mut self, cloudlet: Cloudlet, file_transfer_time: f64, clock: &SimulationClock) -> Admission {
        let mut rcl = match admit_record(cloudlet, clock.time()) {
            Some(rcl) => rcl,
            None => return Admission::Rejected,
        };
        let mips = self.capacity() * rcl.pes() as f64;
        add_file_transfer_length(&mut rcl, mips, file_transfer_time);

        if self.fits(&rcl) {
            Admission::Running(self.start(rcl, clock))
        } else {
            rcl.set_status(CloudletStatus::Queued, clock.time());
            self.queues.waiting.push_back(rcl);
            Admission::Queued
        }
    }

    fn update_processing(&mut self, clock: &SimulationClock, mips_share: &[f64]) -> Option<f64> {
        self.queues.current_mips_share = mips_share.to_vec();
        let capacity = self.capacity();
        self.queues.advance(clock.time(), |rcl| capacity * rcl.pes() as f64);

        self.queues.complete_finished(clock.time());
        self.promote_waiting(clock);

        let next_event = self.queues.next_event(clock, |rcl| capacity * rcl.pes() as f64);
        self.queues.previous_time = clock.time();
        next_event
    }

    fn resume(&mut self, id: CloudletId, clock: &SimulationClock) -> Option<Admission> {
        let mut rcl = self.queues.take_paused(id)?;
        rcl.set_status(CloudletStatus::Resumed, clock.time());
        if self.fits(&rcl) {
            Some(Admission::Running(self.start(rcl, clock)))
        } else {
            rcl.set_status(CloudletStatus::Queued, clock.time());
            self.queues.waiting.push_back(rcl);
            Some(Admission::Queued)
        }
    }

    fn allocated_mips_for(&self, rcl: &ResCloudlet, _time: f64) -> f64 {
        if rcl.status() != CloudletStatus::InExec {
            return 0.;
        }
        self.capacity() * rcl.pes() as f64
    }

    fn queues(&self) -> &CloudletQueues {
        &self.queues
    }

    fn queues_mut(&mut self) -> &mut CloudletQueues {
        &mut self.queues
    }

    fn cancel(&mut self, id: CloudletId, clock: &SimulationClock) -> Option<Cloudlet> {
        let was_running = self.is_running(id);
        let cloudlet = self.queues.cancel(id, clock.time());
        if was_running {
            self.promote_waiting(clock);
        }
        cloudlet
    }

    fn pause(&mut self, id: CloudletId, clock: &SimulationClock) -> bool {
        let was_running = self.is_running(id);
        let paused = self.queues.pause(id, clock.time());
        if was_running {
            self.promote_waiting(clock);
        }
        paused
    }

    fn migrate_out(&mut self, clock: &SimulationClock) -> Option<Cloudlet> {
        let cloudlet = self.queues.migrate_out(clock.time())?;
        self.promote_waiting(clock);
        Some(cloudlet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utilization_model::FullUtilization;

    fn cloudlet(id: u32, length: u64, pes: u32) -> Cloudlet {
        Cloudlet::new(
            CloudletId(id),
            0,
            length,
            pes,
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
        )
        .unwrap()
    }

    #[test]
    fn admission_depends_on_free_pes() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        scheduler.update_processing(&clock, &[1000., 1000.]);

        assert_eq!(
            scheduler.submit(cloudlet(0, 1000, 2), 0., &clock),
            Admission::Running(Some(1.))
        );
        assert_eq!(scheduler.queues().exec()[0].pe_ids(), &[PeId(0), PeId(1)]);
        assert_eq!(scheduler.free_pes(), 0);

        let admission = scheduler.submit(cloudlet(1, 1000, 1), 0., &clock);
        assert_eq!(admission, Admission::Queued);
        assert_eq!(admission.predicted_finish_time(), 0.);
        assert_eq!(scheduler.cloudlet_status(CloudletId(1)), Some(CloudletStatus::Queued));
    }

    #[test]
    fn waiting_cloudlets_are_started_in_fifo_order() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        scheduler.update_processing(&clock, &[100.]);
        for id in 0..3 {
            scheduler.submit(cloudlet(id, 100, 1), 0., &clock);
        }
        assert_eq!(scheduler.running_count(), 1);
        assert_eq!(scheduler.waiting_count(), 2);

        assert_eq!(scheduler.update_processing(&clock.at(1.), &[100.]), Some(2.));
        assert_eq!(scheduler.cloudlet_status(CloudletId(0)), Some(CloudletStatus::Success));
        assert_eq!(scheduler.cloudlet_status(CloudletId(1)), Some(CloudletStatus::InExec));
        assert_eq!(scheduler.cloudlet_status(CloudletId(2)), Some(CloudletStatus::Queued));
        assert_eq!(scheduler.queues().exec()[0].pe_ids(), &[PeId(0)]);

        assert_eq!(scheduler.update_processing(&clock.at(2.), &[100.]), Some(3.));
        assert_eq!(scheduler.update_processing(&clock.at(3.), &[100.]), None);
        let finished: Vec<CloudletId> = std::iter::from_fn(|| scheduler.next_finished())
            .map(|c| c.id())
            .collect();
        assert_eq!(finished, vec![CloudletId(0), CloudletId(1), CloudletId(2)]);
    }

    #[test]
    fn cloudlet_starts_when_enough_pes_are_free() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        scheduler.update_processing(&clock, &[100., 100.]);
        assert!(scheduler.submit(cloudlet(0, 100, 1), 0., &clock).is_running());
        assert_eq!(scheduler.submit(cloudlet(1, 100, 2), 0., &clock), Admission::Queued);

        // The 2-PE cloudlet is waiting, but the single free PE is enough for a 1-PE cloudlet.
        assert_eq!(scheduler.free_pes(), 1);
        assert_eq!(
            scheduler.submit(cloudlet(2, 100, 1), 0., &clock),
            Admission::Running(Some(1.))
        );
        assert_eq!(scheduler.free_pes(), 0);
        assert_eq!(scheduler.cloudlet_status(CloudletId(1)), Some(CloudletStatus::Queued));

        assert_eq!(scheduler.update_processing(&clock.at(1.), &[100., 100.]), Some(1.5));
        assert_eq!(scheduler.cloudlet_status(CloudletId(1)), Some(CloudletStatus::InExec));
        assert_eq!(scheduler.queues().exec()[0].pe_ids(), &[PeId(0), PeId(1)]);
    }

    #[test]
    fn all_fitting_cloudlets_start_when_share_arrives() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        for id in 0..5 {
            assert_eq!(scheduler.submit(cloudlet(id, 100, 1), 0., &clock), Admission::Queued);
        }
        assert_eq!(scheduler.update_processing(&clock, &[100.; 4]), Some(1.));
        assert_eq!(scheduler.running_count(), 4);
        assert_eq!(scheduler.waiting_count(), 1);
        assert_eq!(scheduler.free_pes(), 0);
        assert_eq!(scheduler.cloudlet_status(CloudletId(4)), Some(CloudletStatus::Queued));
    }

    #[test]
    fn growing_share_starts_waiting_cloudlets() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        scheduler.update_processing(&clock, &[100.]);
        for id in 0..3 {
            scheduler.submit(cloudlet(id, 200, 1), 0., &clock);
        }
        assert_eq!(scheduler.running_count(), 1);

        scheduler.update_processing(&clock.at(1.), &[100., 100., 100.]);
        assert_eq!(scheduler.running_count(), 3);
        assert_eq!(scheduler.waiting_count(), 0);
    }

    #[test]
    fn finished_cloudlet_is_not_admitted_again() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        scheduler.update_processing(&clock, &[100.]);
        scheduler.submit(cloudlet(0, 100, 1), 0., &clock);
        scheduler.update_processing(&clock.at(1.), &[100.]);
        let finished = scheduler.next_finished().unwrap();
        assert_eq!(finished.status(), CloudletStatus::Success);

        assert_eq!(scheduler.submit(finished, 0., &clock.at(1.)), Admission::Rejected);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn cancel_of_running_cloudlet_starts_next() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        scheduler.update_processing(&clock, &[100.]);
        scheduler.submit(cloudlet(0, 100, 1), 0., &clock);
        scheduler.submit(cloudlet(1, 100, 1), 0., &clock);

        let canceled = scheduler.cancel(CloudletId(0), &clock).unwrap();
        assert_eq!(canceled.status(), CloudletStatus::Canceled);
        assert_eq!(scheduler.cloudlet_status(CloudletId(1)), Some(CloudletStatus::InExec));
    }

    #[test]
    fn resume_is_queued_when_pes_are_busy() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        scheduler.update_processing(&clock, &[100.]);
        scheduler.submit(cloudlet(0, 100, 1), 0., &clock);
        scheduler.submit(cloudlet(1, 100, 1), 0., &clock);

        assert!(scheduler.pause(CloudletId(0), &clock));
        assert_eq!(scheduler.cloudlet_status(CloudletId(1)), Some(CloudletStatus::InExec));
        assert_eq!(scheduler.resume(CloudletId(0), &clock), Some(Admission::Queued));
        assert_eq!(scheduler.cloudlet_status(CloudletId(0)), Some(CloudletStatus::Queued));
    }

    #[test]
    fn nothing_runs_without_share() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = SpaceSharedScheduler::new();
        assert_eq!(scheduler.submit(cloudlet(0, 100, 1), 0., &clock), Admission::Queued);
        assert_eq!(scheduler.update_processing(&clock.at(1.), &[100.]), Some(2.));
        assert_eq!(scheduler.cloudlet_status(CloudletId(0)), Some(CloudletStatus::InExec));
    }
}
