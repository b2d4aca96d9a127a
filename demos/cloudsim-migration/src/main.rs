use std::io::Write;

use clap::Parser;
use env_logger::Builder;
use serde::Serialize;
use sugars::{boxed, rc, refcell};

use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::simulation::Simulation;
use dslab_core::{cast, log_info};

use dslab_cloudsim::core::cloudlet::{Cloudlet, CloudletStatus};
use dslab_cloudsim::core::cloudlet_scheduler::DynamicWorkloadScheduler;
use dslab_cloudsim::core::common::{CloudletId, GuestId, HostId, SimulationClock, WakeupScheduler, WakeupTag};
use dslab_cloudsim::core::config::sim_config::SimulationConfig;
use dslab_cloudsim::core::error::ConfigError;
use dslab_cloudsim::core::guest::Guest;
use dslab_cloudsim::core::utilization_model::{FullUtilization, StochasticUtilization};
use dslab_cloudsim::datacenter::{Datacenter, DatacenterListener};

/// Runs a datacenter with fluctuating guest load and periodic migration of guests off overloaded hosts.
#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
struct Args {
    /// Path to the simulation config in YAML format.
    #[clap(long, short, default_value = "config.yaml")]
    config: String,

    /// Number of guests.
    #[clap(long, short, default_value = "12")]
    guests: u32,

    /// Length of the cloudlet running on each guest in MI.
    #[clap(long, short, default_value = "300000")]
    length: u64,

    /// Random seed of the simulation and the utilization models.
    #[clap(long, short, default_value = "123")]
    seed: u64,

    /// ID of the host to fail during the run.
    #[clap(long)]
    fail_host: Option<u32>,

    /// Time of the host failure.
    #[clap(long, default_value = "1000")]
    fail_at: f64,
}

// EVENTS //////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Serialize)]
pub struct DatacenterWakeup {
    tag: WakeupTag,
}

#[derive(Clone, Serialize)]
pub struct MigrationRound {}

#[derive(Clone, Serialize)]
pub struct HostFailure {
    host: HostId,
}

// COMPONENTS //////////////////////////////////////////////////////////////////////////////////////

/// Passes wake-ups requested by the datacenter to the simulation as events sent to itself.
struct ContextWakeups<'a>(&'a mut SimulationContext);

impl WakeupScheduler for ContextWakeups<'_> {
    fn schedule_wakeup(&mut self, _entity: u32, delay: f64, tag: WakeupTag) {
        self.0.emit_self(DatacenterWakeup { tag }, delay);
    }
}

#[derive(Default)]
struct Broker {
    submitted: usize,
    finished: Vec<Cloudlet>,
    migrations: Vec<(GuestId, HostId, HostId)>,
}

impl Broker {
    fn is_done(&self) -> bool {
        self.finished.len() >= self.submitted
    }
}

impl DatacenterListener for Broker {
    fn on_cloudlet_finished(&mut self, cloudlet: Cloudlet, _clock: &SimulationClock) {
        self.finished.push(cloudlet);
    }

    fn on_migration_complete(&mut self, guest: GuestId, source: HostId, target: HostId, _clock: &SimulationClock) {
        self.migrations.push((guest, source, target));
    }
}

struct Summary {
    submitted: usize,
    succeeded: usize,
    mean_completion_time: Option<f64>,
}

/// Owns the datacenter and its broker, drives them with simulation events.
pub struct DatacenterComponent {
    dc: Datacenter,
    broker: Broker,
    min_time_between_events: f64,
    migration_interval: f64,
    ctx: SimulationContext,
}

impl DatacenterComponent {
    fn new(dc: Datacenter, min_time_between_events: f64, migration_interval: f64, ctx: SimulationContext) -> Self {
        Self {
            dc,
            broker: Broker::default(),
            min_time_between_events,
            migration_interval,
            ctx,
        }
    }

    fn clock(&self) -> SimulationClock {
        SimulationClock::with_min_time_between_events(self.ctx.time(), self.min_time_between_events)
    }

    /// Creates the guests with a single cloudlet each and schedules the first migration round.
    fn start(&mut self, guests: u32, length: u64, seed: u64) -> Result<(), ConfigError> {
        let clock = self.clock();
        for i in 0..guests {
            let scheduler = boxed!(DynamicWorkloadScheduler::new(1000., 1));
            let guest = Guest::new(GuestId(i), 0, 1000., 1, 1024, 100, 1000, scheduler)?;
            let cloudlet = Cloudlet::new(
                CloudletId(i),
                0,
                length,
                1,
                boxed!(StochasticUtilization::new(seed + i as u64)),
                boxed!(FullUtilization::new()),
                boxed!(FullUtilization::new()),
            )?;
            self.run_on_new_guest(guest, cloudlet);
        }
        if self.migration_interval > 0. {
            self.ctx.emit_self(MigrationRound {}, self.migration_interval);
        }
        Ok(())
    }

    /// Places the guest and submits the cloudlet to it. Returns false if the guest can't be placed.
    fn run_on_new_guest(&mut self, guest: Guest, cloudlet: Cloudlet) -> bool {
        let clock = self.clock();
        let id = guest.id();
        if !self.dc.create_guest(guest, None, &clock) {
            return false;
        }
        let mut wakeups = ContextWakeups(&mut self.ctx);
        if self
            .dc
            .submit_cloudlet(cloudlet, id, 0., &clock, &mut wakeups, &mut self.broker)
            .is_some()
        {
            self.broker.submitted += 1;
        }
        true
    }

    fn on_wakeup(&mut self, tag: WakeupTag) {
        let clock = self.clock();
        let mut wakeups = ContextWakeups(&mut self.ctx);
        self.dc.handle_wakeup(tag, &clock, &mut wakeups, &mut self.broker);
    }

    fn on_migration_round(&mut self) {
        if self.broker.is_done() {
            return;
        }
        let clock = self.clock();
        let mut wakeups = ContextWakeups(&mut self.ctx);
        self.dc.update_cloudlet_processing(&clock, &mut wakeups, &mut self.broker);
        let started = self.dc.run_migration_round(&clock, &mut wakeups);
        if started > 0 {
            log_info!(self.ctx, "started {} migrations", started);
        }
        self.ctx.emit_self(MigrationRound {}, self.migration_interval);
    }

    fn on_host_failure(&mut self, host: HostId) {
        let clock = self.clock();
        let mut wakeups = ContextWakeups(&mut self.ctx);
        if self.dc.mark_host_failed(host, &clock, &mut wakeups) {
            self.dc.update_cloudlet_processing(&clock, &mut wakeups, &mut self.broker);
        }
    }

    /// Completion time is averaged over successful cloudlets only.
    fn summary(&self) -> Summary {
        let completion_times: Vec<f64> = self
            .broker
            .finished
            .iter()
            .filter(|cloudlet| cloudlet.status() == CloudletStatus::Success)
            .filter_map(|cloudlet| cloudlet.finish_time())
            .collect();
        let mean_completion_time = if completion_times.is_empty() {
            None
        } else {
            Some(completion_times.iter().sum::<f64>() / completion_times.len() as f64)
        };
        Summary {
            submitted: self.broker.submitted,
            succeeded: completion_times.len(),
            mean_completion_time,
        }
    }

    fn print_summary(&self, time: f64) {
        let summary = self.summary();
        println!("simulation finished at {:.3}", time);
        println!("- {} of {} cloudlets succeeded", summary.succeeded, summary.submitted);
        if let Some(mean) = summary.mean_completion_time {
            println!("- mean completion time = {:.3}", mean);
        }
        println!("- {} migrations completed", self.broker.migrations.len());
        for (guest, source, target) in self.broker.migrations.iter() {
            println!("  {}: {} -> {}", guest, source, target);
        }
        for host in self.dc.hosts().values() {
            let history = host.state_history();
            let mean = if history.is_empty() {
                0.
            } else {
                history.iter().map(|entry| entry.allocated_mips).sum::<f64>() / history.len() as f64
            };
            println!("- {}: mean allocated MIPS = {:.1}", host.id(), mean);
        }
    }
}

impl EventHandler for DatacenterComponent {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            DatacenterWakeup { tag } => {
                self.on_wakeup(tag);
            }
            MigrationRound {} => {
                self.on_migration_round();
            }
            HostFailure { host } => {
                self.on_host_failure(host);
            }
        })
    }
}

fn exit_on_error<T>(result: Result<T, ConfigError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    let config = exit_on_error(SimulationConfig::from_file(&args.config));
    let dc = exit_on_error(Datacenter::from_config(0, &config));

    let mut sim = Simulation::new(args.seed);
    let component = rc!(refcell!(DatacenterComponent::new(
        dc,
        config.min_time_between_events,
        config.scheduling_interval,
        sim.create_context("datacenter")
    )));
    let component_id = sim.add_handler("datacenter", component.clone());
    exit_on_error(component.borrow_mut().start(args.guests, args.length, args.seed));
    if let Some(host) = args.fail_host {
        let mut ctx = sim.create_context("operator");
        ctx.emit(HostFailure { host: HostId(host) }, component_id, args.fail_at);
    }

    sim.step_until_no_events();
    component.borrow().print_summary(sim.time());
}

#[cfg(test)]
mod tests {
    use dslab_cloudsim::core::allocation_policy::AllocationPolicy;
    use dslab_cloudsim::core::cloudlet_scheduler::TimeSharedScheduler;
    use dslab_cloudsim::core::guest_scheduler::GuestSchedulerKind;
    use dslab_cloudsim::core::host::Host;
    use dslab_cloudsim::core::pe::pe_list;
    use dslab_cloudsim::core::selection_policy::FirstFit;

    use super::*;

    fn guest(id: u32) -> Guest {
        Guest::new(GuestId(id), 0, 1000., 1, 1024, 100, 1000, boxed!(TimeSharedScheduler::new())).unwrap()
    }

    fn cloudlet(id: u32, length: u64) -> Cloudlet {
        Cloudlet::new(
            CloudletId(id),
            0,
            length,
            1,
            boxed!(FullUtilization::new()),
            boxed!(FullUtilization::new()),
            boxed!(FullUtilization::new()),
        )
        .unwrap()
    }

    #[test]
    fn failed_cloudlets_are_not_counted_in_completion_time() {
        let mut dc = Datacenter::new(0, AllocationPolicy::new(boxed!(FirstFit::new())));
        for i in 0..2 {
            let pes = pe_list(1, 1000.).unwrap();
            let host = Host::new(HostId(i), pes, 4096, 1000, 100000, GuestSchedulerKind::TimeShared).unwrap();
            dc.add_host(host);
        }

        let mut sim = Simulation::new(123);
        let component = rc!(refcell!(DatacenterComponent::new(dc, 0.01, 0., sim.create_context("datacenter"))));
        let component_id = sim.add_handler("datacenter", component.clone());
        assert!(component.borrow_mut().run_on_new_guest(guest(0), cloudlet(0, 1000)));
        assert!(component.borrow_mut().run_on_new_guest(guest(1), cloudlet(1, 10000)));
        let mut ctx = sim.create_context("operator");
        ctx.emit(HostFailure { host: HostId(1) }, component_id, 4.);

        sim.step_until_no_events();
        let component = component.borrow();
        let statuses: Vec<CloudletStatus> = component.broker.finished.iter().map(|c| c.status()).collect();
        assert_eq!(
            statuses,
            vec![CloudletStatus::Success, CloudletStatus::FailedResourceUnavailable]
        );
        let summary = component.summary();
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.succeeded, 1);
        assert!((summary.mean_completion_time.unwrap() - 1.).abs() < 1e-9);
    }
}
