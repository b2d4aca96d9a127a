//! Cloudlet (compute task) model and its status.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::core::common::{CloudletId, GuestId, MILLION};
use crate::core::error::ConfigError;
use crate::core::utilization_model::UtilizationModel;

/// Status of cloudlet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CloudletStatus {
    Created,
    Ready,
    Queued,
    InExec,
    Success,
    Failed,
    Canceled,
    Paused,
    Resumed,
    FailedResourceUnavailable,
}

impl CloudletStatus {
    /// Returns true if the cloudlet can't change its status anymore.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CloudletStatus::Success
                | CloudletStatus::Failed
                | CloudletStatus::Canceled
                | CloudletStatus::FailedResourceUnavailable
        )
    }

    /// Checks whether the transition to `next` status is allowed.
    ///
    /// Transitions to the same status are never allowed.
    pub fn can_transition_to(&self, next: CloudletStatus) -> bool {
        use CloudletStatus::*;
        match self {
            Created => matches!(next, Ready | Queued | InExec | Canceled | Failed),
            Ready => matches!(next, Queued | InExec | Canceled | Failed),
            Queued => matches!(next, InExec | Paused | Canceled | Failed),
            InExec => matches!(
                next,
                Success | Canceled | Failed | FailedResourceUnavailable | Paused
            ),
            Paused => matches!(next, Resumed | Canceled | Failed),
            Resumed => matches!(next, InExec | Queued | Canceled | Failed),
            Success | Failed | Canceled | FailedResourceUnavailable => false,
        }
    }
}

impl Display for CloudletStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CloudletStatus::Created => write!(f, "created"),
            CloudletStatus::Ready => write!(f, "ready"),
            CloudletStatus::Queued => write!(f, "queued"),
            CloudletStatus::InExec => write!(f, "in_exec"),
            CloudletStatus::Success => write!(f, "success"),
            CloudletStatus::Failed => write!(f, "failed"),
            CloudletStatus::Canceled => write!(f, "canceled"),
            CloudletStatus::Paused => write!(f, "paused"),
            CloudletStatus::Resumed => write!(f, "resumed"),
            CloudletStatus::FailedResourceUnavailable => write!(f, "failed_resource_unavailable"),
        }
    }
}

/// Execution of cloudlet on a single guest.
///
/// A new record is started each time the cloudlet is submitted to a scheduler, e.g. after migration.
#[derive(Clone, Debug, Serialize)]
pub struct ExecutionRecord {
    pub guest: Option<GuestId>,
    pub arrival_time: f64,
    /// Time spent in the scheduler, from arrival to leaving it.
    pub wall_clock_time: f64,
    /// Time spent in execution.
    pub actual_cpu_time: f64,
    /// Instructions finished by the end of this execution.
    pub finished_so_far: u64,
}

/// Represents a bounded unit of compute work.
///
/// Cloudlet is characterized by its length in MI (million instructions) per PE, the number of required PEs and
/// utilization models for CPU, RAM and bandwidth.
#[derive(Clone)]
pub struct Cloudlet {
    id: CloudletId,
    owner: u32,
    length: u64,
    pes: u32,
    guest: Option<GuestId>,
    cpu_model: Box<dyn UtilizationModel>,
    ram_model: Box<dyn UtilizationModel>,
    bw_model: Box<dyn UtilizationModel>,
    status: CloudletStatus,
    finished_so_far: u64,
    exec_start_time: Option<f64>,
    finish_time: Option<f64>,
    records: Vec<ExecutionRecord>,
}

impl Cloudlet {
    /// Creates cloudlet with specified parameters.
    pub fn new(
        id: CloudletId,
        owner: u32,
        length: u64,
        pes: u32,
        cpu_model: Box<dyn UtilizationModel>,
        ram_model: Box<dyn UtilizationModel>,
        bw_model: Box<dyn UtilizationModel>,
    ) -> Result<Self, ConfigError> {
        if length == 0 || pes == 0 {
            return Err(ConfigError::InvalidCloudlet { cloudlet: id });
        }
        Ok(Self {
            id,
            owner,
            length,
            pes,
            guest: None,
            cpu_model,
            ram_model,
            bw_model,
            status: CloudletStatus::Created,
            finished_so_far: 0,
            exec_start_time: None,
            finish_time: None,
            records: Vec::new(),
        })
    }

    pub fn id(&self) -> CloudletId {
        self.id
    }

    /// Returns ID of the entity which submitted the cloudlet and receives it back when finished.
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Returns cloudlet length per PE in MI.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn pes(&self) -> u32 {
        self.pes
    }

    /// Returns total cloudlet length in MI, i.e. length multiplied by the number of PEs.
    pub fn total_length(&self) -> u64 {
        self.length * self.pes as u64
    }

    /// Returns the guest the cloudlet is bound to.
    pub fn guest(&self) -> Option<GuestId> {
        self.guest
    }

    pub fn set_guest(&mut self, guest: GuestId) {
        self.guest = Some(guest);
    }

    pub fn status(&self) -> CloudletStatus {
        self.status
    }

    /// Changes cloudlet status. Returns false if the transition is not allowed, including the transition to the
    /// current status.
    pub fn set_status(&mut self, status: CloudletStatus) -> bool {
        if !self.status.can_transition_to(status) {
            return false;
        }
        self.status = status;
        true
    }

    /// Returns the number of MI finished so far (over all executions).
    pub fn finished_length(&self) -> u64 {
        self.finished_so_far / MILLION as u64
    }

    /// Returns the number of instructions finished so far (over all executions).
    pub fn finished_instructions(&self) -> u64 {
        self.finished_so_far
    }

    /// Returns true if the whole cloudlet length is processed.
    pub fn is_finished(&self) -> bool {
        self.finished_length() >= self.total_length()
    }

    /// Returns the time when the cloudlet was first started.
    pub fn exec_start_time(&self) -> Option<f64> {
        self.exec_start_time
    }

    /// Returns the time when the cloudlet reached a terminal status.
    pub fn finish_time(&self) -> Option<f64> {
        self.finish_time
    }

    /// Returns records of all executions of this cloudlet.
    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    /// Returns wall-clock time of the latest execution.
    pub fn wall_clock_time(&self) -> f64 {
        self.records.last().map_or(0., |r| r.wall_clock_time)
    }

    /// Returns actual CPU time of the latest execution.
    pub fn actual_cpu_time(&self) -> f64 {
        self.records.last().map_or(0., |r| r.actual_cpu_time)
    }

    pub fn utilization_of_cpu(&self, time: f64) -> f64 {
        self.cpu_model.utilization(time)
    }

    pub fn utilization_of_ram(&self, time: f64) -> f64 {
        self.ram_model.utilization(time)
    }

    pub fn utilization_of_bw(&self, time: f64) -> f64 {
        self.bw_model.utilization(time)
    }

    pub(crate) fn set_length(&mut self, length: u64) {
        self.length = length;
    }

    pub(crate) fn add_finished_instructions(&mut self, instructions: u64) {
        let total = self.total_length() * MILLION as u64;
        self.finished_so_far = (self.finished_so_far + instructions).min(total);
    }

    pub(crate) fn start_record(&mut self, arrival_time: f64) {
        self.records.push(ExecutionRecord {
            guest: self.guest,
            arrival_time,
            wall_clock_time: 0.,
            actual_cpu_time: 0.,
            finished_so_far: self.finished_so_far,
        });
    }

    pub(crate) fn close_record(&mut self, wall_clock_time: f64, actual_cpu_time: f64) {
        let finished_so_far = self.finished_so_far;
        if let Some(record) = self.records.last_mut() {
            record.wall_clock_time = wall_clock_time;
            record.actual_cpu_time = actual_cpu_time;
            record.finished_so_far = finished_so_far;
        }
    }

    pub(crate) fn mark_exec_start(&mut self, time: f64) {
        if self.exec_start_time.is_none() {
            self.exec_start_time = Some(time);
        }
    }

    pub(crate) fn mark_finished(&mut self, time: f64) {
        self.finish_time = Some(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utilization_model::FullUtilization;

    fn cloudlet() -> Cloudlet {
        Cloudlet::new(
            CloudletId(0),
            0,
            1000,
            2,
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
        )
        .unwrap()
    }

    #[test]
    fn same_status_transition_is_rejected() {
        let mut c = cloudlet();
        assert!(!c.set_status(CloudletStatus::Created));
        assert!(c.set_status(CloudletStatus::Ready));
        assert!(c.set_status(CloudletStatus::Queued));
        assert!(c.set_status(CloudletStatus::InExec));
        assert!(!c.set_status(CloudletStatus::InExec));
        assert!(c.set_status(CloudletStatus::Paused));
        assert!(!c.set_status(CloudletStatus::InExec));
        assert!(c.set_status(CloudletStatus::Resumed));
        assert!(c.set_status(CloudletStatus::InExec));
        assert!(c.set_status(CloudletStatus::Success));
        assert!(!c.set_status(CloudletStatus::InExec));
        assert!(!c.set_status(CloudletStatus::Canceled));
    }

    #[test]
    fn finished_length_is_capped_by_total_length() {
        let mut c = cloudlet();
        c.add_finished_instructions(1500 * MILLION as u64);
        assert_eq!(c.finished_length(), 1500);
        c.add_finished_instructions(1000 * MILLION as u64);
        assert_eq!(c.finished_length(), 2000);
        assert!(c.is_finished());
    }

    #[test]
    fn zero_length_is_rejected() {
        let result = Cloudlet::new(
            CloudletId(1),
            0,
            0,
            1,
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
            Box::new(FullUtilization::new()),
        );
        assert!(result.is_err());
    }
}
