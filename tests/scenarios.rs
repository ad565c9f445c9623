use std::cell::RefCell;
use std::rc::Rc;

use comm_fabric::config::router_config::{AdHocConfig, DelayRange, OspfConfig, ProtocolConfig, RipConfig, RouterConfig};
use comm_fabric::config::{
    ActionConfig, ActionKind, CommConfig, IgmpConfig, NetworkConfig, PlatformConfig, ScenarioConfig,
};
use comm_fabric::network::NetworkKind;
use comm_fabric::protocol::Protocol;
use comm_fabric::protocol::rip::INFINITY;
use comm_fabric::{Address, CommError, CommId, FailureReason, Notification, RouterId, Simulation};

fn addr(text: &str) -> Address {
    text.parse().unwrap()
}

fn recorder(simulation: &mut Simulation) -> Rc<RefCell<Vec<Notification>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    simulation.subscribe(move |_, notification| sink.borrow_mut().push(notification.clone()));
    seen
}

fn network(name: &str, address: &str) -> NetworkConfig {
    NetworkConfig {
        name: name.into(),
        address: Some(addr(address)),
        kind: NetworkKind::Mesh,
        members: Vec::new(),
        links: Vec::new(),
        suppress_reserved_check: false,
    }
}

fn platform(name: &str, router: RouterConfig, comms: Vec<CommConfig>) -> PlatformConfig {
    PlatformConfig {
        name: name.into(),
        routers: vec![router],
        comms,
    }
}

fn rip_router() -> RouterConfig {
    RouterConfig::new("router").with_protocol(ProtocolConfig::Rip(RipConfig::default()))
}

fn multicast_router() -> RouterConfig {
    let mut router = RouterConfig::new("router");
    router.use_multicast_protocol = true;
    router
}

fn ospf_router() -> RouterConfig {
    RouterConfig::new("router").with_protocol(ProtocolConfig::Ospf(OspfConfig {
        areas: vec![addr("0.0.0.0")],
        backbone: addr("0.0.0.0"),
        ..OspfConfig::default()
    }))
}

/// OSPF as the only routing protocol, with multicast for its control
/// groups.
fn ospf_only_router(areas: &[&str], backbone: &str) -> RouterConfig {
    let mut router = RouterConfig::new("router").with_protocol(ProtocolConfig::Ospf(OspfConfig {
        areas: areas.iter().map(|area| addr(area)).collect(),
        backbone: addr(backbone),
        ..OspfConfig::default()
    }));
    router.use_multicast_protocol = true;
    router.use_default_protocol = false;
    router
}

fn received(seen: &[Notification], serial: u64) -> Vec<CommId> {
    seen.iter()
        .filter_map(|n| match n {
            Notification::MessageReceived { serial: s, comm, .. } if *s == serial => Some(*comm),
            _ => None,
        })
        .collect()
}

fn comm(simulation: &Simulation, name: &str) -> (CommId, Address) {
    let id = simulation.comm_id(name).unwrap();
    (id, simulation.address_of(id).unwrap())
}

/// a -- [ab] -- b1 (B) b2 -- [bc] -- c
fn rip_line() -> Simulation {
    let scenario = ScenarioConfig {
        networks: vec![network("ab", "10.10.1.0/24"), network("bc", "10.10.2.0/24")],
        platforms: vec![
            platform("a", rip_router(), vec![CommConfig::new("radio").on_network("ab")]),
            platform(
                "b",
                rip_router(),
                vec![CommConfig::new("west").on_network("ab"), CommConfig::new("east").on_network("bc")],
            ),
            platform("c", rip_router(), vec![CommConfig::new("radio").on_network("bc")]),
        ],
        ..ScenarioConfig::default()
    };
    Simulation::from_config(&scenario).unwrap()
}

fn rip_route(simulation: &Simulation, router: &str, destination: &Address) -> Option<(u32, Address, bool)> {
    let router = simulation.router(simulation.router_id(router).unwrap()).unwrap();
    let rip = router.protocols().iter().find_map(Protocol::as_rip)?;
    rip.table()
        .get_route(destination)
        .map(|entry| (entry.metric, entry.gateway, entry.valid))
}

#[test]
fn rip_learns_two_hop_route_and_ages_it_out() {
    let mut simulation = rip_line();
    let (_, a) = comm(&simulation, "a.radio");
    let (_, west) = comm(&simulation, "b.west");
    let (_, c) = comm(&simulation, "c.radio");

    simulation.run_until(100.0).unwrap();
    assert_eq!(rip_route(&simulation, "a.router", &c), Some((2, west, true)));

    assert!(simulation.disable_connection(a, west));
    assert!(simulation.disable_connection(west, a));

    simulation.run_until(100.0 + 181.0).unwrap();
    let (metric, _, valid) = rip_route(&simulation, "a.router", &c).unwrap();
    assert!(!valid);
    assert_eq!(metric, INFINITY);

    simulation.run_until(100.0 + 181.0 + 120.0).unwrap();
    assert_eq!(rip_route(&simulation, "a.router", &c), None);
}

#[test]
fn data_crosses_the_middle_router() {
    let mut simulation = rip_line();
    let (a_id, _) = comm(&simulation, "a.radio");
    let (c_id, c) = comm(&simulation, "c.radio");
    simulation.run_until(100.0).unwrap();
    let seen = recorder(&mut simulation);

    let serial = simulation.send_data(a_id, c, "hello").unwrap();
    simulation.run_until(101.0).unwrap();

    let seen = seen.borrow();
    let received: Vec<_> = seen
        .iter()
        .filter(|n| matches!(n, Notification::MessageReceived { serial: s, .. } if *s == serial))
        .collect();
    assert_eq!(received.len(), 1);
    assert!(matches!(received[0], Notification::MessageReceived { comm, .. } if *comm == c_id));
}

#[test]
fn ospf_elects_by_interface_and_re_elects_on_platform_removal() {
    let lan = network("lan", "10.20.0.0/24");
    let scenario = ScenarioConfig {
        networks: vec![lan],
        platforms: ["p1", "p2", "p3"]
            .iter()
            .map(|name| platform(name, ospf_router(), vec![CommConfig::new("radio").on_network("lan")]))
            .collect(),
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();

    let mut ranked: Vec<(Address, RouterId)> = ["p1", "p2", "p3"]
        .iter()
        .map(|name| {
            let (_, address) = comm(&simulation, &format!("{}.radio", name));
            (address, simulation.router_id(&format!("{}.router", name)).unwrap())
        })
        .collect();
    ranked.sort();
    let network = simulation.manager().managing_network_address(&ranked[0].0).unwrap();
    let backbone = addr("0.0.0.0");

    let area = simulation.ospf().area(&backbone).unwrap();
    assert_eq!(area.dr(&network), Some(ranked[2].1));
    assert_eq!(area.bdr(&network), Some(ranked[1].1));

    let top = simulation.router(ranked[2].1).unwrap().platform().to_string();
    assert!(simulation.remove_platform(&top).unwrap());

    let area = simulation.ospf().area(&backbone).unwrap();
    assert_eq!(area.dr(&network), Some(ranked[1].1));
    assert_eq!(area.bdr(&network), Some(ranked[0].1));
}

#[test]
fn multicast_shares_the_first_hop_and_delivers_once_per_member() {
    let scenario = ScenarioConfig {
        networks: vec![network("left", "10.30.1.0/24"), network("right", "10.30.2.0/24")],
        platforms: vec![
            platform("s", multicast_router(), vec![CommConfig::new("radio").on_network("left")]),
            platform(
                "h",
                multicast_router(),
                vec![CommConfig::new("west").on_network("left"), CommConfig::new("east").on_network("right")],
            ),
            platform("x", multicast_router(), vec![CommConfig::new("radio").on_network("right")]),
            platform("y", multicast_router(), vec![CommConfig::new("radio").on_network("right")]),
            platform("z", multicast_router(), vec![CommConfig::new("radio").on_network("right")]),
        ],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let group = addr("239.1.1.1");
    let (s_id, s) = comm(&simulation, "s.radio");
    let (_, west) = comm(&simulation, "h.west");
    let (x_id, _) = comm(&simulation, "x.radio");
    let (y_id, _) = comm(&simulation, "y.radio");
    let (z_id, _) = comm(&simulation, "z.radio");
    for member in [x_id, y_id, z_id] {
        assert!(simulation.join_group(member, group).unwrap());
    }
    simulation.run_until(2.0).unwrap();
    assert_eq!(simulation.manager().multicast_members(&group).len(), 3);

    let seen = recorder(&mut simulation);
    let serial = simulation.send_data(s_id, group, "news").unwrap();
    simulation.run_until(3.0).unwrap();

    let seen = seen.borrow();
    let from_source: Vec<_> = seen
        .iter()
        .filter(|n| matches!(n, Notification::MessageTransmitted { serial: m, from, .. } if *m == serial && *from == s))
        .collect();
    assert_eq!(from_source.len(), 1);
    assert!(matches!(from_source[0], Notification::MessageTransmitted { to, .. } if *to == west));

    for member in [x_id, y_id, z_id] {
        let copies = seen
            .iter()
            .filter(|n| matches!(n, Notification::MessageReceived { serial: m, comm, .. } if *m == serial && *comm == member))
            .count();
        assert_eq!(copies, 1);
    }
}

#[test]
fn hop_limit_drops_long_paths() {
    let mut short = RouterConfig::new("router");
    short.hop_limit = 1;
    let scenario = ScenarioConfig {
        networks: vec![network("ab", "10.40.1.0/24"), network("bc", "10.40.2.0/24")],
        platforms: vec![
            platform("a", short, vec![CommConfig::new("radio").on_network("ab")]),
            platform(
                "b",
                RouterConfig::new("router"),
                vec![CommConfig::new("west").on_network("ab"), CommConfig::new("east").on_network("bc")],
            ),
            platform("c", RouterConfig::new("router"), vec![CommConfig::new("radio").on_network("bc")]),
        ],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let (a_id, _) = comm(&simulation, "a.radio");
    let (_, c) = comm(&simulation, "c.radio");
    let seen = recorder(&mut simulation);

    let serial = simulation.send_data(a_id, c, "far").unwrap();
    simulation.run_until(1.0).unwrap();

    let seen = seen.borrow();
    assert!(!seen.iter().any(|n| matches!(n, Notification::MessageReceived { .. })));
    assert!(seen.iter().any(|n| matches!(
        n,
        Notification::MessageFailedRouting { serial: s, reason: FailureReason::HopLimitExceeded, .. }
            if *s == serial
    )));
}

#[test]
fn disabling_a_comm_twice_succeeds_with_one_notification() {
    let scenario = ScenarioConfig {
        platforms: vec![platform("a", RouterConfig::new("router"), vec![CommConfig::new("radio")])],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let (id, _) = comm(&simulation, "a.radio");
    let seen = recorder(&mut simulation);

    assert!(simulation.disable_comm(id));
    assert!(simulation.disable_comm(id));
    let disabled = seen
        .borrow()
        .iter()
        .filter(|n| matches!(n, Notification::CommDisabled { .. }))
        .count();
    assert_eq!(disabled, 1);
}

#[test]
fn scheduled_actions_run_at_their_time() {
    let scenario = ScenarioConfig {
        networks: vec![network("lan", "10.50.0.0/24")],
        platforms: vec![
            platform("a", RouterConfig::new("router"), vec![CommConfig::new("radio").on_network("lan")]),
            platform("b", RouterConfig::new("router"), vec![CommConfig::new("radio").on_network("lan")]),
        ],
        actions: vec![
            ActionConfig {
                time: 5.0,
                action: ActionKind::Send {
                    from: "a.radio".into(),
                    to: "b.radio".into(),
                    body: "scheduled".into(),
                },
            },
            ActionConfig {
                time: 10.0,
                action: ActionKind::RemovePlatform { platform: "b".into() },
            },
        ],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let times = Rc::new(RefCell::new(Vec::new()));
    let sink = times.clone();
    simulation.subscribe(move |time, notification| {
        if matches!(notification, Notification::MessageReceived { .. } | Notification::PlatformDeleted { .. }) {
            sink.borrow_mut().push(time);
        }
    });

    simulation.run_until(20.0).unwrap();
    assert_eq!(*times.borrow(), vec![5.0, 10.0]);
    assert!(simulation.platform("b").is_none());
    assert_eq!(simulation.now(), 20.0);
}

#[test]
fn unknown_network_members_are_skipped() {
    let mut lan = network("lan", "10.60.0.0/24");
    lan.members.push("ghost.radio".into());
    lan.members.push("a.radio".into());
    let scenario = ScenarioConfig {
        networks: vec![lan],
        platforms: vec![platform("a", RouterConfig::new("router"), vec![CommConfig::new("radio")])],
        ..ScenarioConfig::default()
    };
    let simulation = Simulation::from_config(&scenario).unwrap();
    let (_, address) = comm(&simulation, "a.radio");
    assert_eq!(simulation.manager().network_of(&address).unwrap().name(), "lan");
}

#[test]
fn member_listed_against_its_own_network_is_rejected() {
    let mut lan = network("lan", "10.70.1.0/24");
    lan.members.push("a.radio".into());
    let scenario = ScenarioConfig {
        networks: vec![lan, network("wan", "10.70.2.0/24")],
        platforms: vec![platform(
            "a",
            RouterConfig::new("router"),
            vec![CommConfig::new("radio").on_network("wan")],
        )],
        ..ScenarioConfig::default()
    };
    assert!(matches!(
        Simulation::from_config(&scenario),
        Err(CommError::Configuration { .. })
    ));
}

/// a -- [ab] -- b.west (b) b.east -- [bc] -- c, all OSPF only.
fn ospf_line() -> Simulation {
    let scenario = ScenarioConfig {
        networks: vec![network("ab", "10.11.1.0/24"), network("bc", "10.11.2.0/24")],
        platforms: vec![
            platform("a", ospf_only_router(&["0.0.0.0"], "0.0.0.0"), vec![CommConfig::new("radio").on_network("ab")]),
            platform(
                "b",
                ospf_only_router(&["0.0.0.0"], "0.0.0.0"),
                vec![CommConfig::new("west").on_network("ab"), CommConfig::new("east").on_network("bc")],
            ),
            platform("c", ospf_only_router(&["0.0.0.0"], "0.0.0.0"), vec![CommConfig::new("radio").on_network("bc")]),
        ],
        ..ScenarioConfig::default()
    };
    Simulation::from_config(&scenario).unwrap()
}

#[test]
fn ospf_routes_two_hops_long_after_the_hold_timer() {
    let mut simulation = ospf_line();
    let (a_id, a) = comm(&simulation, "a.radio");
    let (c_id, c) = comm(&simulation, "c.radio");
    let a_router = simulation.router_id("a.router").unwrap();
    let backbone = addr("0.0.0.0");

    simulation.run_until(100.0).unwrap();
    let instance = simulation.ospf().instance(a_router).unwrap();
    let record = instance.link_states().find(&backbone, &a, &c).unwrap();
    assert!(record.last_update > 60.0);

    let seen = recorder(&mut simulation);
    let serial = simulation.send_data(a_id, c, "far").unwrap();
    simulation.run_until(101.0).unwrap();
    assert_eq!(received(&seen.borrow(), serial), vec![c_id]);
}

/// Three OSPF routers on one LAN, ranked by interface address.
fn ospf_lan() -> (Simulation, Vec<(Address, RouterId)>, Address) {
    let scenario = ScenarioConfig {
        networks: vec![network("lan", "10.21.0.0/24")],
        platforms: ["p1", "p2", "p3"]
            .iter()
            .map(|name| {
                platform(
                    name,
                    ospf_only_router(&["0.0.0.0"], "0.0.0.0"),
                    vec![CommConfig::new("radio").on_network("lan")],
                )
            })
            .collect(),
        ..ScenarioConfig::default()
    };
    let simulation = Simulation::from_config(&scenario).unwrap();
    let mut ranked: Vec<(Address, RouterId)> = ["p1", "p2", "p3"]
        .iter()
        .map(|name| {
            let (_, address) = comm(&simulation, &format!("{}.radio", name));
            (address, simulation.router_id(&format!("{}.router", name)).unwrap())
        })
        .collect();
    ranked.sort();
    let network = simulation.manager().managing_network_address(&ranked[0].0).unwrap();
    (simulation, ranked, network)
}

#[test]
fn ospf_hands_designated_roles_on_when_routers_and_comms_go_down() {
    let (mut simulation, ranked, network) = ospf_lan();
    let backbone = addr("0.0.0.0");
    let [low, mid, top] = [ranked[0], ranked[1], ranked[2]];
    let dr = |simulation: &Simulation| simulation.ospf().area(&backbone).unwrap().dr(&network);
    let bdr = |simulation: &Simulation| simulation.ospf().area(&backbone).unwrap().bdr(&network);
    assert_eq!(dr(&simulation), Some(top.1));

    assert!(simulation.turn_off_router(top.1).unwrap());
    assert_eq!(dr(&simulation), Some(mid.1));
    assert_eq!(bdr(&simulation), Some(low.1));

    let mid_comm = simulation.manager().comm_at(&mid.0).unwrap();
    assert!(simulation.turn_off_comm(mid_comm).unwrap());
    assert_eq!(dr(&simulation), Some(low.1));
    assert_eq!(bdr(&simulation), None);

    assert!(simulation.turn_on_router(top.1).unwrap());
    assert_eq!(dr(&simulation), Some(low.1));
    assert_eq!(bdr(&simulation), Some(top.1));
}

#[test]
fn ospf_timeout_drops_a_silent_dr_and_hello_adds_it_back() {
    let (mut simulation, ranked, network) = ospf_lan();
    let backbone = addr("0.0.0.0");
    let [low, mid, top] = [ranked[0], ranked[1], ranked[2]];
    let top_comm = simulation.manager().comm_at(&top.0).unwrap();

    simulation.run_until(5.0).unwrap();
    assert!(simulation.disable_comm(top_comm));
    simulation.run_until(60.0).unwrap();

    let area = simulation.ospf().area(&backbone).unwrap();
    assert_eq!(area.dr(&network), Some(mid.1));
    assert_eq!(area.bdr(&network), Some(low.1));
    let graph = simulation.ospf().instance(mid.1).unwrap().graph(&backbone).unwrap();
    assert!(!graph.contains_node(&top.0));
    let low_state = simulation.ospf().instance(low.1).unwrap().link_states();
    assert!(low_state.find_remote(&backbone, &top.0).is_empty());

    assert!(simulation.enable_comm(top_comm));
    simulation.run_until(100.0).unwrap();

    assert_eq!(simulation.ospf().area(&backbone).unwrap().dr(&network), Some(mid.1));
    let graph = simulation.ospf().instance(mid.1).unwrap().graph(&backbone).unwrap();
    assert!(graph.contains_node(&top.0));
    let low_state = simulation.ospf().instance(low.1).unwrap().link_states();
    assert!(low_state.find(&backbone, &low.0, &top.0).is_some());
}

#[test]
fn ospf_crosses_an_area_border_into_the_backbone() {
    let scenario = ScenarioConfig {
        networks: vec![network("n1", "10.22.1.0/24"), network("n0", "10.22.0.0/24")],
        platforms: vec![
            platform("x", ospf_only_router(&["0.0.0.1"], "0.0.0.0"), vec![CommConfig::new("radio").on_network("n1")]),
            platform(
                "abr",
                ospf_only_router(&["0.0.0.0", "0.0.0.1"], "0.0.0.0"),
                vec![CommConfig::new("west").on_network("n1"), CommConfig::new("east").on_network("n0")],
            ),
            platform("y", ospf_only_router(&["0.0.0.0"], "0.0.0.0"), vec![CommConfig::new("radio").on_network("n0")]),
        ],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let (x_id, _) = comm(&simulation, "x.radio");
    let (y_id, y) = comm(&simulation, "y.radio");

    simulation.run_until(100.0).unwrap();
    let seen = recorder(&mut simulation);
    let serial = simulation.send_data(x_id, y, "across").unwrap();
    simulation.run_until(101.0).unwrap();
    assert_eq!(received(&seen.borrow(), serial), vec![y_id]);
}

#[test]
fn ospf_hands_external_destinations_to_a_boundary_router() {
    let mut boundary = ospf_only_router(&["0.0.0.0"], "0.0.0.0");
    boundary.protocols.push(ProtocolConfig::Rip(RipConfig::default()));
    let scenario = ScenarioConfig {
        networks: vec![network("n0", "10.23.0.0/24"), network("n2", "10.23.2.0/24")],
        platforms: vec![
            platform("o", ospf_only_router(&["0.0.0.0"], "0.0.0.0"), vec![CommConfig::new("radio").on_network("n0")]),
            platform(
                "g",
                boundary,
                vec![CommConfig::new("west").on_network("n0"), CommConfig::new("east").on_network("n2")],
            ),
            platform("r", rip_router(), vec![CommConfig::new("radio").on_network("n2")]),
        ],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let (o_id, _) = comm(&simulation, "o.radio");
    let (r_id, r) = comm(&simulation, "r.radio");

    simulation.run_until(5.0).unwrap();
    let seen = recorder(&mut simulation);
    let serial = simulation.send_data(o_id, r, "outside").unwrap();
    simulation.run_until(6.0).unwrap();
    assert_eq!(received(&seen.borrow(), serial), vec![r_id]);
}

fn single_ospf_platform(router: RouterConfig) -> ScenarioConfig {
    ScenarioConfig {
        networks: vec![network("lan", "10.24.0.0/24")],
        platforms: vec![platform("p", router, vec![CommConfig::new("radio").on_network("lan")])],
        ..ScenarioConfig::default()
    }
}

#[test]
fn ospf_setup_rejects_broken_area_layouts() {
    let no_areas = single_ospf_platform(ospf_only_router(&[], "0.0.0.0"));
    assert!(matches!(
        Simulation::from_config(&no_areas),
        Err(CommError::OspfMissingArea { .. })
    ));

    let detached = single_ospf_platform(ospf_only_router(&["0.0.0.1"], "0.0.0.0"));
    assert!(matches!(
        Simulation::from_config(&detached),
        Err(CommError::OspfBackbone { .. })
    ));

    let mut inconsistent = single_ospf_platform(ospf_only_router(&["0.0.0.1"], "0.0.0.1"));
    inconsistent.platforms.push(platform(
        "q",
        ospf_only_router(&["0.0.0.1"], "0.0.0.0"),
        vec![CommConfig::new("radio").on_network("lan")],
    ));
    assert!(matches!(
        Simulation::from_config(&inconsistent),
        Err(CommError::OspfInconsistentBackbone { .. })
    ));
}

#[test]
fn adhoc_sees_a_new_connection_only_after_its_delay() {
    let mut router = RouterConfig::new("router").with_protocol(ProtocolConfig::AdHoc(AdHocConfig {
        connection_added_delay: DelayRange::new(5.0, 5.0),
        ..AdHocConfig::default()
    }));
    router.use_default_protocol = false;
    let scenario = ScenarioConfig {
        networks: vec![network("left", "10.25.1.0/24"), network("right", "10.25.2.0/24")],
        platforms: vec![
            platform("a", router, vec![CommConfig::new("radio").on_network("left")]),
            platform("b", RouterConfig::new("router"), vec![CommConfig::new("radio").on_network("right")]),
        ],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let (a_id, a) = comm(&simulation, "a.radio");
    let (b_id, b) = comm(&simulation, "b.radio");
    simulation.run_until(1.0).unwrap();
    let seen = recorder(&mut simulation);

    assert!(simulation.add_connection(a, b));
    let early = simulation.send_data(a_id, b, "early").unwrap();
    simulation.run_until(5.0).unwrap();
    let late = simulation.send_data(a_id, b, "still early").unwrap();
    simulation.run_until(7.0).unwrap();
    let on_time = simulation.send_data(a_id, b, "on time").unwrap();
    simulation.run_until(8.0).unwrap();

    let seen = seen.borrow();
    for serial in [early, late] {
        assert!(received(&seen, serial).is_empty());
        assert!(seen.iter().any(|n| matches!(n, Notification::MessageFailedRouting { serial: s, .. } if *s == serial)));
    }
    assert_eq!(received(&seen, on_time), vec![b_id]);
}

#[test]
fn igmp_membership_changes_after_their_delays() {
    let mut radio = CommConfig::new("radio").on_network("lan");
    radio.igmp = IgmpConfig {
        enabled: true,
        join_delay: DelayRange::new(2.0, 2.0),
        leave_delay: DelayRange::new(3.0, 3.0),
    };
    let scenario = ScenarioConfig {
        networks: vec![network("lan", "10.26.0.0/24")],
        platforms: vec![platform("a", RouterConfig::new("router"), vec![radio])],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let (id, address) = comm(&simulation, "a.radio");
    let group = addr("239.2.2.2");
    let member = |simulation: &Simulation| simulation.manager().has_multicast_member(&group, &address);

    assert!(simulation.join_group(id, group).unwrap());
    simulation.run_until(1.0).unwrap();
    assert!(!member(&simulation));
    simulation.run_until(2.5).unwrap();
    assert!(member(&simulation));

    assert!(simulation.leave_group(id, group).unwrap());
    simulation.run_until(5.0).unwrap();
    assert!(member(&simulation));
    simulation.run_until(6.0).unwrap();
    assert!(!member(&simulation));

    assert!(simulation.join_group(id, group).unwrap());
    assert!(simulation.turn_off_comm(id).unwrap());
    simulation.run_until(10.0).unwrap();
    assert!(!member(&simulation));
}

#[test]
fn router_without_protocols_falls_back_to_a_remote_gateway() {
    let mut bare = RouterConfig::new("router");
    bare.use_default_protocol = false;
    let scenario = ScenarioConfig {
        networks: vec![network("ab", "10.27.1.0/24"), network("bc", "10.27.2.0/24")],
        platforms: vec![
            platform("a", bare, vec![CommConfig::new("radio").on_network("ab")]),
            platform(
                "b",
                RouterConfig::new("router"),
                vec![CommConfig::new("west").on_network("ab"), CommConfig::new("east").on_network("bc")],
            ),
            platform("c", RouterConfig::new("router"), vec![CommConfig::new("radio").on_network("bc")]),
        ],
        ..ScenarioConfig::default()
    };
    let mut simulation = Simulation::from_config(&scenario).unwrap();
    let (a_id, _) = comm(&simulation, "a.radio");
    let (_, west) = comm(&simulation, "b.west");
    let (c_id, c) = comm(&simulation, "c.radio");
    let seen = recorder(&mut simulation);

    let stranded = simulation.send_data(a_id, c, "nowhere").unwrap();
    simulation.run_until(1.0).unwrap();
    assert!(received(&seen.borrow(), stranded).is_empty());

    let a_router = simulation.router_id("a.router").unwrap();
    simulation.router_mut(a_router).unwrap().set_gateway(Some(west));
    let routed = simulation.send_data(a_id, c, "via b").unwrap();
    simulation.run_until(2.0).unwrap();
    assert_eq!(received(&seen.borrow(), routed), vec![c_id]);
}
