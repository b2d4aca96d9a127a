//! Cloudlet schedulers dividing the capacity granted to a guest among its cloudlets.

use std::collections::VecDeque;

use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::common::{earliest, CloudletId, SimulationClock, MILLION};
use crate::core::res_cloudlet::ResCloudlet;

pub use crate::core::cloudlet_schedulers::dynamic_workload::DynamicWorkloadScheduler;
pub use crate::core::cloudlet_schedulers::space_shared::SpaceSharedScheduler;
pub use crate::core::cloudlet_schedulers::time_shared::TimeSharedScheduler;

/// Result of admitting a cloudlet into a scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Admission {
    /// Cloudlet is executed. Contains the predicted finish time if the current share allows to compute it.
    Running(Option<f64>),
    /// Cloudlet waits for free capacity, no finish time is predicted.
    Queued,
    /// Cloudlet can't be executed because of its status, e.g. it is already finished. The cloudlet is dropped.
    Rejected,
}

impl Admission {
    pub fn is_running(&self) -> bool {
        matches!(self, Admission::Running(_))
    }

    /// Returns the predicted finish time or zero if there is no prediction.
    pub fn predicted_finish_time(&self) -> f64 {
        match self {
            Admission::Running(Some(time)) => *time,
            _ => 0.,
        }
    }
}

/// Trait for implementation of cloudlet schedulers.
///
/// A scheduler receives the MIPS share currently granted to its guest (one value per guest PE) on each
/// [`update_processing`](CloudletScheduler::update_processing) call, advances the progress of active cloudlets over
/// the time elapsed since the previous call and predicts the next completion time.
pub trait CloudletScheduler {
    /// Admits a cloudlet. `file_transfer_time` models the time needed to move input files before the execution and
    /// inflates the cloudlet length accordingly.
    fn submit(&mut self, cloudlet: Cloudlet, file_transfer_time: f64, clock: &SimulationClock) -> Admission;

    /// Advances active cloudlets to the clock time using the given MIPS share.
    ///
    /// Returns the earliest predicted completion time of active cloudlets or `None` if there are no such cloudlets.
    /// The returned time is never closer to the current time than the minimum time between events.
    fn update_processing(&mut self, clock: &SimulationClock, mips_share: &[f64]) -> Option<f64>;

    /// Resumes a paused cloudlet. Returns `None` if there is no such paused cloudlet.
    fn resume(&mut self, id: CloudletId, clock: &SimulationClock) -> Option<Admission>;

    /// Returns the rate (in MIPS) at which the cloudlet is processed at the given time.
    fn allocated_mips_for(&self, rcl: &ResCloudlet, time: f64) -> f64;

    fn queues(&self) -> &CloudletQueues;

    fn queues_mut(&mut self) -> &mut CloudletQueues;

    /// Removes cloudlet from the scheduler, finished cloudlets are returned as is, others are canceled.
    fn cancel(&mut self, id: CloudletId, clock: &SimulationClock) -> Option<Cloudlet> {
        self.queues_mut().cancel(id, clock.time())
    }

    /// Pauses active or waiting cloudlet. Returns false if there is no such cloudlet.
    fn pause(&mut self, id: CloudletId, clock: &SimulationClock) -> bool {
        self.queues_mut().pause(id, clock.time())
    }

    /// Removes one active cloudlet, e.g. to transfer it to another guest. The cloudlet is returned paused.
    fn migrate_out(&mut self, clock: &SimulationClock) -> Option<Cloudlet> {
        self.queues_mut().migrate_out(clock.time())
    }

    /// Fails all cloudlets because the underlying resources became unavailable. Failed cloudlets are moved to the
    /// finished queue. Returns the number of failed cloudlets.
    fn fail_all(&mut self, clock: &SimulationClock) -> usize {
        self.queues_mut().fail_all(clock.time())
    }

    /// Returns MIPS requested by the scheduler for each guest PE or `None` if it needs the whole guest capacity.
    fn current_requested_mips(&self) -> Option<Vec<f64>> {
        None
    }

    /// Returns true if there are finished cloudlets not yet collected.
    fn has_finished(&self) -> bool {
        !self.queues().finished.is_empty()
    }

    /// Removes and returns the next finished cloudlet.
    fn next_finished(&mut self) -> Option<Cloudlet> {
        self.queues_mut().finished.pop_front().map(|rcl| rcl.into_cloudlet())
    }

    fn cloudlet_status(&self, id: CloudletId) -> Option<CloudletStatus> {
        self.queues().status_of(id)
    }

    /// Returns the number of cloudlets in execution.
    fn running_count(&self) -> usize {
        self.queues().exec.len()
    }

    /// Returns the number of cloudlets waiting for free capacity.
    fn waiting_count(&self) -> usize {
        self.queues().waiting.len()
    }

    /// Returns true if there are neither active nor waiting cloudlets.
    fn is_idle(&self) -> bool {
        self.queues().exec.is_empty() && self.queues().waiting.is_empty()
    }

    /// Returns the time of the previous update.
    fn previous_time(&self) -> f64 {
        self.queues().previous_time
    }

    /// Returns MIPS share used in the previous update.
    fn current_mips_share(&self) -> &[f64] {
        &self.queues().current_mips_share
    }

    /// Returns the total CPU utilization of active cloudlets.
    fn total_utilization_of_cpu(&self, time: f64) -> f64 {
        self.queues()
            .exec
            .iter()
            .map(|rcl| rcl.cloudlet().utilization_of_cpu(time))
            .sum()
    }

    fn current_requested_utilization_of_ram(&self, time: f64) -> f64 {
        self.queues()
            .exec
            .iter()
            .map(|rcl| rcl.cloudlet().utilization_of_ram(time))
            .sum()
    }

    fn current_requested_utilization_of_bw(&self, time: f64) -> f64 {
        self.queues()
            .exec
            .iter()
            .map(|rcl| rcl.cloudlet().utilization_of_bw(time))
            .sum()
    }
}

/// Cloudlet sets shared by all scheduler variants.
#[derive(Default)]
pub struct CloudletQueues {
    pub(crate) previous_time: f64,
    pub(crate) current_mips_share: Vec<f64>,
    pub(crate) exec: Vec<ResCloudlet>,
    pub(crate) waiting: VecDeque<ResCloudlet>,
    pub(crate) paused: Vec<ResCloudlet>,
    pub(crate) finished: VecDeque<ResCloudlet>,
}

impl CloudletQueues {
    pub fn exec(&self) -> &[ResCloudlet] {
        &self.exec
    }

    pub fn waiting(&self) -> impl Iterator<Item = &ResCloudlet> {
        self.waiting.iter()
    }

    pub fn paused(&self) -> &[ResCloudlet] {
        &self.paused
    }

    /// Returns the number of PEs occupied by active cloudlets.
    pub fn used_pes(&self) -> u32 {
        self.exec.iter().map(|rcl| rcl.pes()).sum()
    }

    pub fn status_of(&self, id: CloudletId) -> Option<CloudletStatus> {
        self.exec
            .iter()
            .chain(self.waiting.iter())
            .chain(self.paused.iter())
            .chain(self.finished.iter())
            .find(|rcl| rcl.id() == id)
            .map(|rcl| rcl.status())
    }

    /// Adds processed instructions to each active cloudlet according to its rate.
    ///
    /// Cloudlets started after the previous update are advanced from their start time only.
    pub(crate) fn advance<F: Fn(&ResCloudlet) -> f64>(&mut self, time: f64, rate: F) {
        let previous_time = self.previous_time;
        for rcl in self.exec.iter_mut() {
            let time_span = time - previous_time.max(rcl.start_exec_time());
            if time_span <= 0. {
                continue;
            }
            let mips = rate(rcl);
            if mips > 0. {
                rcl.update_finished_so_far((mips * time_span * MILLION).round() as u64);
            }
        }
    }

    /// Returns the time span since the previous update during which the cloudlet was executed.
    pub(crate) fn exec_span(&self, rcl: &ResCloudlet, time: f64) -> f64 {
        (time - self.previous_time.max(rcl.start_exec_time())).max(0.)
    }

    /// Moves completed cloudlets to the finished queue and returns their number.
    pub(crate) fn complete_finished(&mut self, time: f64) -> usize {
        let (done, active): (Vec<_>, Vec<_>) = self.exec.drain(..).partition(|rcl| rcl.remaining_length() == 0);
        self.exec = active;
        let count = done.len();
        for rcl in done {
            self.finish(rcl, time);
        }
        count
    }

    /// Estimates the earliest completion time of active cloudlets.
    pub(crate) fn next_event<F: Fn(&ResCloudlet) -> f64>(&self, clock: &SimulationClock, rate: F) -> Option<f64> {
        let mut next_event = None;
        for rcl in self.exec.iter() {
            next_event = earliest(next_event, estimate_finish_time(rcl, rate(rcl), clock));
        }
        next_event
    }

    pub(crate) fn finish(&mut self, mut rcl: ResCloudlet, time: f64) {
        let remaining = rcl.remaining_instructions();
        rcl.update_finished_so_far(remaining);
        rcl.set_status(CloudletStatus::Success, time);
        rcl.finalize(time);
        self.finished.push_back(rcl);
    }

    pub(crate) fn take_exec(&mut self, id: CloudletId) -> Option<ResCloudlet> {
        let pos = self.exec.iter().position(|rcl| rcl.id() == id)?;
        Some(self.exec.remove(pos))
    }

    pub(crate) fn take_waiting(&mut self, id: CloudletId) -> Option<ResCloudlet> {
        let pos = self.waiting.iter().position(|rcl| rcl.id() == id)?;
        self.waiting.remove(pos)
    }

    pub(crate) fn take_paused(&mut self, id: CloudletId) -> Option<ResCloudlet> {
        let pos = self.paused.iter().position(|rcl| rcl.id() == id)?;
        Some(self.paused.remove(pos))
    }

    pub(crate) fn cancel(&mut self, id: CloudletId, time: f64) -> Option<Cloudlet> {
        if let Some(pos) = self.finished.iter().position(|rcl| rcl.id() == id) {
            return self.finished.remove(pos).map(|rcl| rcl.into_cloudlet());
        }
        if let Some(rcl) = self.take_exec(id) {
            if rcl.remaining_length() == 0 {
                self.finish(rcl, time);
                return self.finished.pop_back().map(|rcl| rcl.into_cloudlet());
            }
            return Some(Self::cancel_record(rcl, time));
        }
        let rcl = self.take_paused(id).or_else(|| self.take_waiting(id))?;
        Some(Self::cancel_record(rcl, time))
    }

    fn cancel_record(mut rcl: ResCloudlet, time: f64) -> Cloudlet {
        rcl.finalize(time);
        rcl.set_status(CloudletStatus::Canceled, time);
        rcl.into_cloudlet()
    }

    pub(crate) fn pause(&mut self, id: CloudletId, time: f64) -> bool {
        if let Some(mut rcl) = self.take_exec(id) {
            if rcl.remaining_length() == 0 {
                self.finish(rcl, time);
            } else {
                rcl.set_status(CloudletStatus::Paused, time);
                self.paused.push(rcl);
            }
            return true;
        }
        if let Some(mut rcl) = self.take_waiting(id) {
            rcl.set_status(CloudletStatus::Paused, time);
            self.paused.push(rcl);
            return true;
        }
        false
    }

    pub(crate) fn fail_all(&mut self, time: f64) -> usize {
        let mut count = 0;
        let running: Vec<ResCloudlet> = self.exec.drain(..).collect();
        for mut rcl in running {
            rcl.finalize(time);
            rcl.set_status(CloudletStatus::FailedResourceUnavailable, time);
            self.finished.push_back(rcl);
            count += 1;
        }
        let inactive: Vec<ResCloudlet> = self.waiting.drain(..).chain(self.paused.drain(..)).collect();
        for mut rcl in inactive {
            rcl.finalize(time);
            rcl.set_status(CloudletStatus::Failed, time);
            self.finished.push_back(rcl);
            count += 1;
        }
        count
    }

    pub(crate) fn migrate_out(&mut self, time: f64) -> Option<Cloudlet> {
        if self.exec.is_empty() {
            return None;
        }
        let mut rcl = self.exec.remove(0);
        rcl.finalize(time);
        rcl.set_status(CloudletStatus::Paused, time);
        Some(rcl.into_cloudlet())
    }
}

/// Creates execution record for a submitted cloudlet. Cloudlets migrated from another guest arrive paused and are
/// brought back to the resumed state.
///
/// Returns `None` if the cloudlet can't be started from its current status.
pub(crate) fn admit_record(cloudlet: Cloudlet, time: f64) -> Option<ResCloudlet> {
    let status = cloudlet.status();
    if status != CloudletStatus::Paused && !status.can_transition_to(CloudletStatus::InExec) {
        return None;
    }
    let mut rcl = ResCloudlet::new(cloudlet, time);
    if rcl.status() == CloudletStatus::Paused {
        rcl.set_status(CloudletStatus::Resumed, time);
    }
    Some(rcl)
}

/// Inflates cloudlet length by the amount of work which could be done during the file transfer.
pub(crate) fn add_file_transfer_length(rcl: &mut ResCloudlet, mips: f64, file_transfer_time: f64) {
    if file_transfer_time > 0. && mips > 0. {
        let extra = (mips * file_transfer_time / rcl.pes() as f64).round() as u64;
        rcl.extend_length(extra);
    }
}

/// Estimates the completion time of a cloudlet processed at the given rate.
///
/// Returns `None` if the rate is zero. The estimate is never closer than the minimum time between events.
pub fn estimate_finish_time(rcl: &ResCloudlet, mips: f64, clock: &SimulationClock) -> Option<f64> {
    if !(mips > 0.) {
        return None;
    }
    let remaining = rcl.remaining_instructions() as f64 / MILLION;
    let finish_time = clock.time() + remaining / mips;
    Some(finish_time.max(clock.time() + clock.min_time_between_events()))
}

/// Returns the total capacity of the share and the number of PEs with non-zero capacity.
pub(crate) fn share_capacity(mips_share: &[f64]) -> (f64, u32) {
    let mut capacity = 0.;
    let mut cpus = 0;
    for mips in mips_share {
        capacity += mips;
        if *mips > 0. {
            cpus += 1;
        }
    }
    (capacity, cpus)
}
