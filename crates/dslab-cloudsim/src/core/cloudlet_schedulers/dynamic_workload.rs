//! Cloudlet scheduler for guests running a long-lived online service.

use std::collections::BTreeMap;

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::cloudlet_scheduler::{
    add_file_transfer_length, admit_record, estimate_finish_time, share_capacity, Admission, CloudletQueues,
    CloudletScheduler,
};
use crate::core::common::{CloudletId, PeId, SimulationClock};
use crate::core::res_cloudlet::ResCloudlet;

/// Processes cloudlets at the rate requested by their CPU utilization models.
///
/// A cloudlet requests `utilization(t) * mips * pes` MIPS, where `mips` is the guest capacity per PE. If the granted
/// share is smaller than the total request, every cloudlet gets the same fraction of its request. The difference
/// between requested and allocated MIPS is accumulated per cloudlet.
///
/// Usually there is a single cloudlet representing the service, driven by a trace utilization model.
pub struct DynamicWorkloadScheduler {
    queues: CloudletQueues,
    mips: f64,
    pes: u32,
    under_allocated_mips: BTreeMap<CloudletId, f64>,
}

impl DynamicWorkloadScheduler {
    /// Creates scheduler for a guest with `pes` PEs of `mips` capacity each.
    pub fn new(mips: f64, pes: u32) -> Self {
        Self {
            queues: CloudletQueues::default(),
            mips,
            pes,
            under_allocated_mips: BTreeMap::new(),
        }
    }

    /// Returns the accumulated difference between requested and allocated MIPS (in MIPS * seconds) for each cloudlet.
    pub fn under_allocated_mips(&self) -> &BTreeMap<CloudletId, f64> {
        &self.under_allocated_mips
    }

    /// Returns the total under-allocated MIPS of the cloudlet.
    pub fn under_allocated_mips_for(&self, id: CloudletId) -> f64 {
        self.under_allocated_mips.get(&id).copied().unwrap_or(0.)
    }

    fn requested_mips_for(&self, rcl: &ResCloudlet, time: f64) -> f64 {
        let pes = rcl.pes().min(self.pes) as f64;
        rcl.cloudlet().utilization_of_cpu(time).clamp(0., 1.) * self.mips * pes
    }

    /// Fraction of the requested MIPS which can be served with the current share.
    fn share_factor(&self, time: f64) -> f64 {
        let (capacity, _) = share_capacity(&self.queues.current_mips_share);
        let requested: f64 = self
            .queues
            .exec
            .iter()
            .map(|rcl| self.requested_mips_for(rcl, time))
            .sum();
        if requested <= capacity {
            return 1.;
        }
        capacity.max(0.) / requested
    }

    fn rate_for(&self, rcl: &ResCloudlet, time: f64, factor: f64) -> f64 {
        self.requested_mips_for(rcl, time) * factor
    }

    fn record_under_allocation(&mut self, time: f64) {
        let previous_time = self.queues.previous_time;
        let factor = self.share_factor(previous_time);
        let mut records = Vec::new();
        for rcl in self.queues.exec.iter() {
            let span = self.queues.exec_span(rcl, time);
            if span <= 0. {
                continue;
            }
            let requested = self.requested_mips_for(rcl, previous_time);
            let allocated = requested * factor;
            if requested > allocated {
                records.push((rcl.id(), (requested - allocated) * span));
            }
        }
        for (id, amount) in records {
            *self.under_allocated_mips.entry(id).or_insert(0.) += amount;
        }
    }
}

impl CloudletScheduler for DynamicWorkloadScheduler {
    fn submit(&mut self, cloudlet: Cloudlet, file_transfer_time: f64, clock: &SimulationClock) -> Admission {
        let mut rcl = match admit_record(cloudlet, clock.time()) {
            Some(rcl) => rcl,
            None => return Admission::Rejected,
        };
        if !rcl.set_status(CloudletStatus::InExec, clock.time()) {
            return Admission::Rejected;
        }
        rcl.assign_pes((0..rcl.pes().min(self.pes)).map(PeId).collect());
        self.queues.exec.push(rcl);

        let factor = self.share_factor(clock.time());
        let mips = match self.queues.exec.last() {
            Some(rcl) => self.rate_for(rcl, clock.time(), factor),
            None => 0.,
        };
        match self.queues.exec.last_mut() {
            Some(rcl) => {
                add_file_transfer_length(rcl, mips, file_transfer_time);
                Admission::Running(estimate_finish_time(rcl, mips, clock))
            }
            None => Admission::Running(None),
        }
    }

    fn update_processing(&mut self, clock: &SimulationClock, mips_share: &[f64]) -> Option<f64> {
        self.queues.current_mips_share = mips_share.to_vec();
        let previous_time = self.queues.previous_time;

        self.record_under_allocation(clock.time());
        let factor = self.share_factor(previous_time);
        let rates: BTreeMap<CloudletId, f64> = self
            .queues
            .exec
            .iter()
            .map(|rcl| (rcl.id(), self.rate_for(rcl, previous_time, factor)))
            .collect();
        self.queues
            .advance(clock.time(), |rcl| rates.get(&rcl.id()).copied().unwrap_or(0.));

        if self.queues.exec.is_empty() {
            self.queues.previous_time = clock.time();
            return None;
        }

        self.queues.complete_finished(clock.time());
        let factor = self.share_factor(clock.time());
        let next_event = self
            .queues
            .next_event(clock, |rcl| self.rate_for(rcl, clock.time(), factor));
        self.queues.previous_time = clock.time();
        next_event
    }

    fn resume(&mut self, id: CloudletId, clock: &SimulationClock) -> Option<Admission> {
        let mut rcl = self.queues.take_paused(id)?;
        rcl.set_status(CloudletStatus::Resumed, clock.time());
        rcl.set_status(CloudletStatus::InExec, clock.time());
        self.queues.exec.push(rcl);
        let factor = self.share_factor(clock.time());
        let rcl = self.queues.exec.last()?;
        let mips = self.rate_for(rcl, clock.time(), factor);
        Some(Admission::Running(estimate_finish_time(rcl, mips, clock)))
    }

    fn allocated_mips_for(&self, rcl: &ResCloudlet, time: f64) -> f64 {
        self.rate_for(rcl, time, self.share_factor(time))
    }

    fn queues(&self) -> &CloudletQueues {
        &self.queues
    }

    fn queues_mut(&mut self) -> &mut CloudletQueues {
        &mut self.queues
    }

    fn current_requested_mips(&self) -> Option<Vec<f64>> {
        let utilization = self.total_utilization_of_cpu(self.queues.previous_time).min(1.);
        Some(vec![self.mips * utilization; self.pes as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utilization_model::{ConstantUtilization, FullUtilization, TraceUtilization};

    fn cloudlet(id: u32, length: u64, cpu_load: f64) -> Cloudlet {
        Cloudlet::new(
            CloudletId(id),
            0,
            length,
            1,
            Box::new(ConstantUtilization::new(cpu_load)),
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
        )
        .unwrap()
    }

    #[test]
    fn rate_follows_cpu_utilization() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = DynamicWorkloadScheduler::new(1000., 1);
        scheduler.update_processing(&clock, &[1000.]);
        assert_eq!(
            scheduler.submit(cloudlet(0, 1000, 0.5), 0., &clock),
            Admission::Running(Some(2.))
        );
        assert_eq!(scheduler.current_requested_mips(), Some(vec![500.]));

        assert_eq!(scheduler.update_processing(&clock.at(1.), &[1000.]), Some(2.));
        assert_eq!(scheduler.queues().exec()[0].cloudlet().finished_length(), 500);
        assert_eq!(scheduler.under_allocated_mips_for(CloudletId(0)), 0.);
    }

    #[test]
    fn under_allocation_is_accumulated() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = DynamicWorkloadScheduler::new(1000., 1);
        scheduler.update_processing(&clock, &[1000.]);
        scheduler.submit(cloudlet(0, 1000, 0.5), 0., &clock);

        scheduler.update_processing(&clock.at(1.), &[250.]);
        assert_eq!(scheduler.queues().exec()[0].cloudlet().finished_length(), 250);
        assert_eq!(scheduler.under_allocated_mips_for(CloudletId(0)), 250.);
    }

    #[test]
    fn idle_guest_requests_nothing() {
        let scheduler = DynamicWorkloadScheduler::new(1000., 2);
        assert_eq!(scheduler.current_requested_mips(), Some(vec![0., 0.]));
    }

    #[test]
    fn trace_driven_cloudlet() {
        let clock = SimulationClock::new(0.);
        let mut scheduler = DynamicWorkloadScheduler::new(100., 1);
        scheduler.update_processing(&clock, &[100.]);
        let trace = TraceUtilization::new(10., vec![1., 0.5]).unwrap();
        let c = Cloudlet::new(
            CloudletId(0),
            0,
            10_000,
            1,
            Box::new(trace),
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
        )
        .unwrap();
        scheduler.submit(c, 0., &clock);

        scheduler.update_processing(&clock.at(10.), &[100.]);
        assert_eq!(scheduler.queues().exec()[0].cloudlet().finished_length(), 1000);
        scheduler.update_processing(&clock.at(20.), &[100.]);
        assert_eq!(scheduler.queues().exec()[0].cloudlet().finished_length(), 1500);
    }
}
