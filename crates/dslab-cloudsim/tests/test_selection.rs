use std::collections::BTreeSet;

use dslab_cloudsim::core::allocation_policy::{AllocationPolicy, Placement};
use dslab_cloudsim::core::cloudlet_scheduler::TimeSharedScheduler;
use dslab_cloudsim::core::common::{GuestId, HostId, SimulationClock};
use dslab_cloudsim::core::error::ConfigError;
use dslab_cloudsim::core::guest::Guest;
use dslab_cloudsim::core::guest_scheduler::GuestSchedulerKind;
use dslab_cloudsim::core::host::Host;
use dslab_cloudsim::core::pe::pe_list;
use dslab_cloudsim::core::selection_policy::{
    selection_policy_resolver, FirstFit, LeastFull, MaximumUsage, MostFull, RandomSelection, SelectionPolicy, WorstFit,
};
use dslab_cloudsim::datacenter::Datacenter;

fn guest(id: u32, pes: u32) -> Guest {
    Guest::new(GuestId(id), 0, 1000., pes, 256, 10, 100, Box::new(TimeSharedScheduler::new())).unwrap()
}

// Three hosts with 4 PEs each: host#0 runs one guest, host#1 runs three guests and host#2 is empty.
fn datacenter(selection: Box<dyn SelectionPolicy<Host>>) -> Datacenter {
    let mut dc = Datacenter::new(0, AllocationPolicy::new(selection));
    for i in 0..3 {
        let host = Host::new(
            HostId(i),
            pe_list(4, 1000.).unwrap(),
            4096,
            1000,
            100000,
            GuestSchedulerKind::TimeShared,
        )
        .unwrap();
        dc.add_host(host);
    }
    let clock = SimulationClock::new(0.);
    for (id, host) in [(0, 0), (1, 1), (2, 1), (3, 1)] {
        assert!(dc.create_guest(guest(id, 1), Some(Placement::Host(HostId(host))), &clock));
    }
    dc
}

fn select(
    policy: &mut dyn SelectionPolicy<Host>,
    dc: &Datacenter,
    requester: &Guest,
    excluded: &[u32],
) -> Option<HostId> {
    let candidates: Vec<&Host> = dc.hosts().values().collect();
    let excluded: BTreeSet<HostId> = excluded.iter().map(|id| HostId(*id)).collect();
    policy
        .select(&candidates, Some(requester), &excluded)
        .map(|host| host.id())
}

#[test]
fn policies_choose_hosts_by_their_criteria() {
    let dc = datacenter(Box::new(FirstFit::new()));
    let requester = guest(10, 1);
    assert_eq!(dc.host(HostId(1)).unwrap().utilization(), 0.75);

    assert_eq!(select(&mut FirstFit::new(), &dc, &requester, &[]), Some(HostId(0)));
    assert_eq!(select(&mut LeastFull::new(), &dc, &requester, &[]), Some(HostId(2)));
    assert_eq!(select(&mut MostFull::new(), &dc, &requester, &[]), Some(HostId(1)));
    assert_eq!(select(&mut WorstFit::new(), &dc, &requester, &[]), Some(HostId(2)));
    assert_eq!(select(&mut MaximumUsage::new(), &dc, &requester, &[]), Some(HostId(1)));
}

#[test]
fn excluded_and_unsuitable_hosts_are_skipped() {
    let dc = datacenter(Box::new(FirstFit::new()));
    let small = guest(10, 1);
    let large = guest(11, 2);

    assert_eq!(select(&mut LeastFull::new(), &dc, &small, &[2]), Some(HostId(0)));
    assert_eq!(select(&mut WorstFit::new(), &dc, &small, &[2]), Some(HostId(0)));
    assert_eq!(select(&mut FirstFit::new(), &dc, &small, &[0, 1, 2]), None);
    // host#1 has only one free PE
    assert_eq!(select(&mut MostFull::new(), &dc, &large, &[]), Some(HostId(0)));
    assert_eq!(select(&mut MostFull::new(), &dc, &large, &[0, 2]), None);
}

#[test]
fn random_selection_is_reproducible() {
    let dc = datacenter(Box::new(FirstFit::new()));
    let requester = guest(10, 2);
    let mut first = RandomSelection::new(123);
    let mut second = RandomSelection::new(123);
    for _ in 0..20 {
        let host = select(&mut first, &dc, &requester, &[]);
        assert_eq!(host, select(&mut second, &dc, &requester, &[]));
        assert!(matches!(host, Some(HostId(0)) | Some(HostId(2))));
    }
}

#[test]
fn least_full_allocation_spreads_guests() {
    let mut dc = datacenter(Box::new(LeastFull::new()));
    let clock = SimulationClock::new(0.);
    for id in 10..13 {
        assert!(dc.create_guest(guest(id, 1), None, &clock));
    }
    let hosts: Vec<HostId> = (10..13)
        .map(|id| dc.allocation_policy().host_of(GuestId(id)).unwrap())
        .collect();
    // ties go to the first host
    assert_eq!(hosts, vec![HostId(2), HostId(0), HostId(2)]);
}

#[test]
fn guest_selection_uses_guest_usage() {
    let dc = datacenter(Box::new(FirstFit::new()));
    let guests: Vec<_> = dc.host(HostId(1)).unwrap().state().guests().to_vec();
    let refs: Vec<_> = guests.iter().map(|id| dc.guest(*id).unwrap()).collect();
    let borrowed: Vec<_> = refs.iter().map(|guest| guest.borrow()).collect();
    let candidates: Vec<&Guest> = borrowed.iter().map(|guest| &**guest).collect();

    let excluded = BTreeSet::from([GuestId(1)]);
    let selected = MaximumUsage::new().select(&candidates, None, &excluded).unwrap();
    assert_eq!(selected.id(), GuestId(2));
}

#[test]
fn policies_are_resolved_from_config() {
    assert!(selection_policy_resolver::<Host>("LeastFull").is_ok());
    assert!(selection_policy_resolver::<Guest>("MaximumCorrelation").is_ok());
    assert!(selection_policy_resolver::<Host>("Random[seed=3]").is_ok());
    assert!(matches!(
        selection_policy_resolver::<Host>("Random[seed=x]"),
        Err(ConfigError::InvalidOption { .. })
    ));
    assert!(matches!(
        selection_policy_resolver::<Host>("BestFit"),
        Err(ConfigError::UnknownPolicy { .. })
    ));
}
