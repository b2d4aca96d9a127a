//! Datacenter: host pool, guest lifecycle, cloudlet processing updates and migrations.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::allocation_policy::{AllocationPolicy, Placement};
use crate::core::cloudlet::{Cloudlet, CloudletStatus};
use crate::core::cloudlet_scheduler::Admission;
use crate::core::common::{earliest, CloudletId, GuestId, HostId, SimulationClock, WakeupScheduler, WakeupTag};
use crate::core::config::sim_config::SimulationConfig;
use crate::core::error::ConfigError;
use crate::core::guest::Guest;
use crate::core::guest_host::GuestHost;
use crate::core::guest_registry::GuestRegistry;
use crate::core::guest_scheduler::GuestSchedulerKind;
use crate::core::host::Host;
use crate::core::migration_policy::{migration_policy_resolver, MigrationPolicy, MigrationProposal, NoMigration};
use crate::core::pe::pe_list;
use crate::core::selection_policy::selection_policy_resolver;
use crate::{log_debug, log_error, log_info, log_warn};

/// Receiver of cloudlets and migration results, usually a broker.
pub trait DatacenterListener {
    /// Called exactly once for each cloudlet which left the datacenter (finished or failed).
    fn on_cloudlet_finished(&mut self, cloudlet: Cloudlet, clock: &SimulationClock);

    fn on_migration_complete(&mut self, guest: GuestId, source: HostId, target: HostId, clock: &SimulationClock);
}

/// Guest migration in progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Migration {
    pub source: HostId,
    pub target: HostId,
    pub start_time: f64,
    pub duration: f64,
}

pub struct Datacenter {
    id: u32,
    name: String,
    hosts: IndexMap<HostId, Host>,
    registry: GuestRegistry,
    allocation_policy: AllocationPolicy,
    migration_policy: Box<dyn MigrationPolicy>,
    migrations: BTreeMap<GuestId, Migration>,
    last_process_time: Option<f64>,
    scheduling_interval: f64,
    migration_bandwidth_share: f64,
}

impl Datacenter {
    /// Creates datacenter without hosts. `id` is the entity ID used in wake-up requests.
    pub fn new(id: u32, allocation_policy: AllocationPolicy) -> Self {
        Self {
            id,
            name: format!("datacenter#{}", id),
            hosts: IndexMap::new(),
            registry: GuestRegistry::new(),
            allocation_policy,
            migration_policy: Box::new(NoMigration),
            migrations: BTreeMap::new(),
            last_process_time: None,
            scheduling_interval: 0.,
            migration_bandwidth_share: 0.5,
        }
    }

    /// Creates datacenter with hosts and policies from the simulation config.
    pub fn from_config(id: u32, config: &SimulationConfig) -> Result<Self, ConfigError> {
        let allocation_policy = AllocationPolicy::new(selection_policy_resolver(&config.allocation)?);
        let mut datacenter = Self::new(id, allocation_policy)
            .with_scheduling_interval(config.scheduling_interval)
            .with_migration_bandwidth_share(config.migration_bandwidth_share);
        if let Some(migration) = &config.migration {
            datacenter = datacenter.with_migration_policy(migration_policy_resolver(migration)?);
        }
        let mut next_host_id = 0;
        for host_config in config.hosts.iter() {
            let kind = match &host_config.guest_scheduler {
                Some(kind) => kind.parse::<GuestSchedulerKind>()?,
                None => GuestSchedulerKind::TimeShared,
            };
            for _ in 0..host_config.count.unwrap_or(1) {
                let host = Host::new(
                    HostId(next_host_id),
                    pe_list(host_config.pes, host_config.pe_mips)?,
                    host_config.ram,
                    host_config.bw,
                    host_config.storage,
                    kind,
                )?;
                datacenter.add_host(host);
                next_host_id += 1;
            }
        }
        Ok(datacenter)
    }

    pub fn with_migration_policy(mut self, migration_policy: Box<dyn MigrationPolicy>) -> Self {
        self.migration_policy = migration_policy;
        self
    }

    /// Sets the maximal time between processing updates while there are running cloudlets, 0 disables the limit.
    pub fn with_scheduling_interval(mut self, scheduling_interval: f64) -> Self {
        self.scheduling_interval = scheduling_interval;
        self
    }

    /// Sets the fraction of the target host bandwidth used for migration.
    pub fn with_migration_bandwidth_share(mut self, migration_bandwidth_share: f64) -> Self {
        self.migration_bandwidth_share = migration_bandwidth_share;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn add_host(&mut self, host: Host) {
        self.hosts.insert(host.id(), host);
    }

    pub fn hosts(&self) -> &IndexMap<HostId, Host> {
        &self.hosts
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    pub fn guest(&self, id: GuestId) -> Option<Rc<RefCell<Guest>>> {
        self.registry.get(id).cloned()
    }

    pub fn registry(&self) -> &GuestRegistry {
        &self.registry
    }

    pub fn allocation_policy(&self) -> &AllocationPolicy {
        &self.allocation_policy
    }

    /// Returns migrations in progress.
    pub fn migrations(&self) -> &BTreeMap<GuestId, Migration> {
        &self.migrations
    }

    /// Registers the guest and places it on the target or on a host found by the allocation policy.
    ///
    /// The guest is processed right after placement so that its cloudlet scheduler observes the allocated share.
    /// Returns false and forgets the guest if it can't be placed.
    pub fn create_guest(&mut self, guest: Guest, target: Option<Placement>, clock: &SimulationClock) -> bool {
        let id = guest.id();
        if self.registry.contains(id) {
            log_warn!(clock, self.name, "{} already exists", id);
            return false;
        }
        let guest = self.registry.insert(guest);
        let mut guest = guest.borrow_mut();
        if !self
            .allocation_policy
            .allocate_host_for(&mut guest, target, &mut self.hosts, &self.registry, clock)
        {
            drop(guest);
            self.registry.remove(id);
            log_warn!(clock, self.name, "failed to create {}", id);
            return false;
        }
        let allocated = guest.current_allocated_mips().to_vec();
        guest.update_processing(clock, &allocated, &self.registry);
        log_info!(
            clock,
            self.name,
            "created {} on {}",
            id,
            self.allocation_policy.placement_of(id).map_or("-".to_string(), |p| p.to_string())
        );
        true
    }

    /// Destroys the guest together with its nested guests. Cloudlets left on the guest are dropped.
    pub fn destroy_guest(&mut self, id: GuestId, clock: &SimulationClock) -> bool {
        let guest = match self.registry.get(id) {
            Some(guest) => guest.clone(),
            None => return false,
        };
        let nested: Vec<GuestId> = guest
            .borrow()
            .hosting()
            .map_or(Vec::new(), |hosting| hosting.guests().to_vec());
        for nested_id in nested {
            self.destroy_guest(nested_id, clock);
        }

        let mut guest = guest.borrow_mut();
        if let Some(migration) = self.migrations.remove(&id) {
            if let Some(target) = self.hosts.get_mut(&migration.target) {
                target.remove_migrating_in_guest(&mut guest);
            }
        }
        self.allocation_policy
            .deallocate_host_for(&mut guest, &mut self.hosts, &self.registry, clock);
        drop(guest);
        self.registry.remove(id);
        log_info!(clock, self.name, "destroyed {}", id);
        true
    }

    /// Submits the cloudlet to the guest and schedules a processing update at its predicted finish time.
    ///
    /// Returns `None` if the guest doesn't exist. A cloudlet submitted to a guest without a working host (its host has
    /// failed or the guest was lost) is not admitted, it fails and is handed to the listener right away.
    pub fn submit_cloudlet(
        &mut self,
        mut cloudlet: Cloudlet,
        guest: GuestId,
        file_transfer_time: f64,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
        listener: &mut dyn DatacenterListener,
    ) -> Option<Admission> {
        self.update_cloudlet_processing(clock, wakeups, listener);
        let guest_ref = match self.registry.get(guest) {
            Some(guest_ref) => guest_ref.clone(),
            None => {
                log_warn!(clock, self.name, "can't submit {}: {} doesn't exist", cloudlet.id(), guest);
                return None;
            }
        };
        let cloudlet_id = cloudlet.id();
        cloudlet.set_guest(guest);
        if !self.has_working_host(guest) {
            log_warn!(clock, self.name, "{} failed: {} has no working host", cloudlet_id, guest);
            if cloudlet.set_status(CloudletStatus::Failed) {
                cloudlet.mark_finished(clock.time());
                listener.on_cloudlet_finished(cloudlet, clock);
            }
            return Some(Admission::Rejected);
        }
        let admission = guest_ref
            .borrow_mut()
            .cloudlet_scheduler_mut()
            .submit(cloudlet, file_transfer_time, clock);
        match admission {
            Admission::Running(predicted) => {
                log_debug!(clock, self.name, "{} started on {}", cloudlet_id, guest);
                self.schedule_processing(predicted, clock, wakeups);
            }
            Admission::Queued => log_debug!(clock, self.name, "{} queued on {}", cloudlet_id, guest),
            Admission::Rejected => log_warn!(clock, self.name, "{} rejected by {}", cloudlet_id, guest),
        }
        Some(admission)
    }

    /// Checks whether the guest is placed (directly or through its parents) on a host which hasn't failed.
    fn has_working_host(&self, guest: GuestId) -> bool {
        self.allocation_policy
            .host_of(guest)
            .and_then(|host| self.hosts.get(&host))
            .map_or(false, |host| !host.is_failed())
    }

    /// Cancels the cloudlet and returns it, `None` if it isn't found on the guest.
    pub fn cancel_cloudlet(
        &mut self,
        id: CloudletId,
        guest: GuestId,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
        listener: &mut dyn DatacenterListener,
    ) -> Option<Cloudlet> {
        self.update_cloudlet_processing(clock, wakeups, listener);
        let cloudlet = self.registry.get(guest)?.borrow_mut().cloudlet_scheduler_mut().cancel(id, clock);
        if cloudlet.is_some() {
            self.schedule_processing(None, clock, wakeups);
        }
        cloudlet
    }

    pub fn pause_cloudlet(
        &mut self,
        id: CloudletId,
        guest: GuestId,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
        listener: &mut dyn DatacenterListener,
    ) -> bool {
        self.update_cloudlet_processing(clock, wakeups, listener);
        let paused = match self.registry.get(guest) {
            Some(guest) => guest.borrow_mut().cloudlet_scheduler_mut().pause(id, clock),
            None => false,
        };
        if paused {
            self.schedule_processing(None, clock, wakeups);
        }
        paused
    }

    pub fn resume_cloudlet(
        &mut self,
        id: CloudletId,
        guest: GuestId,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
        listener: &mut dyn DatacenterListener,
    ) -> Option<Admission> {
        self.update_cloudlet_processing(clock, wakeups, listener);
        let admission = self.registry.get(guest)?.borrow_mut().cloudlet_scheduler_mut().resume(id, clock)?;
        if let Admission::Running(predicted) = admission {
            self.schedule_processing(predicted, clock, wakeups);
        }
        Some(admission)
    }

    /// Updates processing of all hosts, hands finished cloudlets to the listener and schedules the next update.
    ///
    /// Does nothing if called again within the minimum time between events. Returns the time of the next update or
    /// `None` if there is nothing to process.
    pub fn update_cloudlet_processing(
        &mut self,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
        listener: &mut dyn DatacenterListener,
    ) -> Option<f64> {
        let now = clock.time();
        if let Some(last) = self.last_process_time {
            if now < last + clock.min_time_between_events() {
                return None;
            }
        }
        let mut next_event = None;
        for host in self.hosts.values_mut() {
            next_event = earliest(next_event, host.update_guests_processing(clock, &self.registry));
        }
        self.last_process_time = Some(now);
        self.sweep_finished_cloudlets(clock, listener);

        let mut next_event = next_event?.max(now + clock.min_time_between_events());
        if self.scheduling_interval > 0. {
            next_event = next_event.min(now + self.scheduling_interval);
        }
        wakeups.schedule_wakeup(self.id, next_event - now, WakeupTag::CloudletProcessing);
        Some(next_event)
    }

    /// Hands every finished cloudlet to the listener, guests are visited in ID order.
    fn sweep_finished_cloudlets(&self, clock: &SimulationClock, listener: &mut dyn DatacenterListener) {
        for (id, guest) in self.registry.iter() {
            let finished: Vec<Cloudlet> = {
                let mut guest = guest.borrow_mut();
                let scheduler = guest.cloudlet_scheduler_mut();
                std::iter::from_fn(|| scheduler.next_finished()).collect()
            };
            for cloudlet in finished {
                log_info!(clock, self.name, "{} on {} finished with status {}", cloudlet.id(), id, cloudlet.status());
                listener.on_cloudlet_finished(cloudlet, clock);
            }
        }
    }

    fn schedule_processing(&self, predicted: Option<f64>, clock: &SimulationClock, wakeups: &mut dyn WakeupScheduler) {
        let min_delay = clock.min_time_between_events();
        let delay = predicted.map_or(min_delay, |time| (time - clock.time()).max(min_delay));
        wakeups.schedule_wakeup(self.id, delay, WakeupTag::CloudletProcessing);
    }

    /// Starts live migration of the guest to the target host.
    ///
    /// The target reserves resources for the guest, which keeps running on the source with a degraded share until
    /// the migration is committed after `ram / (target bw * migration bandwidth share)`.
    pub fn start_migration(
        &mut self,
        guest: GuestId,
        target: HostId,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
    ) -> bool {
        if self.migrations.contains_key(&guest) {
            log_warn!(clock, self.name, "{} is already being migrated", guest);
            return false;
        }
        let source = match self.allocation_policy.placement_of(guest) {
            Some(Placement::Host(source)) => source,
            _ => {
                log_warn!(clock, self.name, "{} is not placed on a host and can't be migrated", guest);
                return false;
            }
        };
        if source == target {
            return false;
        }
        let guest_ref = match self.registry.get(guest) {
            Some(guest_ref) => guest_ref.clone(),
            None => return false,
        };
        let mut guest_ref = guest_ref.borrow_mut();
        let host = match self.hosts.get_mut(&target) {
            Some(host) => host,
            None => return false,
        };
        if !host.add_migrating_in_guest(&mut guest_ref, clock) {
            log_warn!(clock, self.name, "{} can't accept migrating {}", target, guest);
            return false;
        }
        let bandwidth = host.bw() as f64 * self.migration_bandwidth_share;
        let duration = if bandwidth > 0. {
            (guest_ref.ram() as f64 / bandwidth).max(clock.min_time_between_events())
        } else {
            clock.min_time_between_events()
        };
        self.migrations.insert(
            guest,
            Migration {
                source,
                target,
                start_time: clock.time(),
                duration,
            },
        );
        wakeups.schedule_wakeup(self.id, duration, WakeupTag::MigrationCommit(guest));
        log_info!(
            clock,
            self.name,
            "started migration of {} from {} to {}, expected duration {:.3}",
            guest,
            source,
            target,
            duration
        );
        true
    }

    /// Commits the migration of the guest: it leaves the source and gets its full share on the target.
    pub fn complete_migration(
        &mut self,
        guest: GuestId,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
        listener: &mut dyn DatacenterListener,
    ) -> bool {
        if !self.migrations.contains_key(&guest) {
            return false;
        }
        self.update_cloudlet_processing(clock, wakeups, listener);
        let migration = match self.migrations.remove(&guest) {
            Some(migration) => migration,
            None => return false,
        };
        let guest_ref = match self.registry.get(guest) {
            Some(guest_ref) => guest_ref.clone(),
            None => return false,
        };
        let mut guest_ref = guest_ref.borrow_mut();
        self.allocation_policy
            .deallocate_host_for(&mut guest_ref, &mut self.hosts, &self.registry, clock);
        if let Some(host) = self.hosts.get_mut(&migration.target) {
            host.remove_migrating_in_guest(&mut guest_ref);
        }
        let target = Some(Placement::Host(migration.target));
        if !self
            .allocation_policy
            .allocate_host_for(&mut guest_ref, target, &mut self.hosts, &self.registry, clock)
        {
            log_error!(clock, self.name, "migration of {} to {} failed", guest, migration.target);
            let source = Some(Placement::Host(migration.source));
            if !self
                .allocation_policy
                .allocate_host_for(&mut guest_ref, source, &mut self.hosts, &self.registry, clock)
            {
                drop(guest_ref);
                let failed = fail_guest_cloudlets(&self.registry, guest, clock);
                log_error!(clock, self.name, "{} is lost, {} cloudlets failed", guest, failed);
                self.sweep_finished_cloudlets(clock, listener);
            }
            return false;
        }
        drop(guest_ref);
        log_info!(
            clock,
            self.name,
            "migration of {} from {} to {} completed",
            guest,
            migration.source,
            migration.target
        );
        listener.on_migration_complete(guest, migration.source, migration.target, clock);
        self.schedule_processing(None, clock, wakeups);
        true
    }

    /// Returns migrations proposed by the migration policy.
    pub fn optimize_allocation(&mut self) -> Vec<MigrationProposal> {
        self.migration_policy.optimize_allocation(&self.hosts, &self.registry)
    }

    /// Starts all migrations proposed by the migration policy and returns the number of started migrations.
    pub fn run_migration_round(&mut self, clock: &SimulationClock, wakeups: &mut dyn WakeupScheduler) -> usize {
        let proposals = self.optimize_allocation();
        let mut started = 0;
        for proposal in proposals {
            if self.start_migration(proposal.guest, proposal.target, clock, wakeups) {
                started += 1;
            }
        }
        started
    }

    /// Marks the host as failed and stops its processing.
    ///
    /// Cloudlets of its guests, nested guests included, fail and are handed to the listener on the next update.
    pub fn mark_host_failed(&mut self, id: HostId, clock: &SimulationClock, wakeups: &mut dyn WakeupScheduler) -> bool {
        let host = match self.hosts.get_mut(&id) {
            Some(host) => host,
            None => return false,
        };
        if host.is_failed() {
            return false;
        }
        host.set_failed(true);
        let guests = host.state().guests().to_vec();
        let failed: usize = guests
            .into_iter()
            .map(|guest| fail_guest_cloudlets(&self.registry, guest, clock))
            .sum();
        log_warn!(clock, self.name, "{} failed, {} cloudlets failed", id, failed);
        self.schedule_processing(None, clock, wakeups);
        true
    }

    /// Reacts to the wake-up requested by the datacenter earlier.
    pub fn handle_wakeup(
        &mut self,
        tag: WakeupTag,
        clock: &SimulationClock,
        wakeups: &mut dyn WakeupScheduler,
        listener: &mut dyn DatacenterListener,
    ) {
        match tag {
            WakeupTag::CloudletProcessing => {
                self.update_cloudlet_processing(clock, wakeups, listener);
            }
            WakeupTag::MigrationCommit(guest) => {
                self.complete_migration(guest, clock, wakeups, listener);
            }
        }
    }
}

/// Fails cloudlets of the guest and of its nested guests. Returns the number of failed cloudlets.
fn fail_guest_cloudlets(registry: &GuestRegistry, id: GuestId, clock: &SimulationClock) -> usize {
    let guest = match registry.get(id) {
        Some(guest) => guest,
        None => return 0,
    };
    let (failed, nested) = {
        let mut guest = guest.borrow_mut();
        let failed = guest.cloudlet_scheduler_mut().fail_all(clock);
        let nested = guest.hosting().map_or(Vec::new(), |hosting| hosting.guests().to_vec());
        (failed, nested)
    };
    failed
        + nested
            .into_iter()
            .map(|nested| fail_guest_cloudlets(registry, nested, clock))
            .sum::<usize>()
}
