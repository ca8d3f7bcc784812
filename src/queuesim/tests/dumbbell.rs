use std::net::Ipv4Addr;

use queuesim::engine::{ArrivalSink, Deployment, EngineNodeId, SimulationEngine};
use queuesim::topology::{ClusterSpec, LinkSpec, TopoSpec, Topology, TopologyBuilder};
use queuesim::tracker::{FlowError, Phase};
use queuesim::traffic::{PairingPolicy, TrafficMatrixBuilder};
use queuesim::{
    assign_addresses, engine, secs, AddressAllocator, BandwidthTrait, Duration, FlowId,
    FlowTracker, Protocol, QueueDiscipline, Timestamp,
};

/// A stand-in for the simulation platform: records what gets installed and
/// replays a scripted arrival sequence in timestamp order.
#[derive(Debug, Default)]
struct ScriptedEngine {
    now: Timestamp,
    stopped: bool,
    nodes: usize,
    links: Vec<(EngineNodeId, EngineNodeId, LinkSpec)>,
    senders: Vec<(EngineNodeId, Ipv4Addr, u16, Protocol, u64, Timestamp)>,
    receivers: Vec<(EngineNodeId, u16, FlowId)>,
    script: Vec<(FlowId, u64, Timestamp)>,
}

impl SimulationEngine for ScriptedEngine {
    fn create_node(&mut self) -> EngineNodeId {
        let id = self.nodes;
        self.nodes += 1;
        id
    }

    fn install_link(&mut self, a: EngineNodeId, b: EngineNodeId, spec: &LinkSpec) {
        self.links.push((a, b, *spec));
    }

    fn install_sender(
        &mut self,
        node: EngineNodeId,
        dst: Ipv4Addr,
        port: u16,
        protocol: Protocol,
        bytes: u64,
        start: Timestamp,
    ) {
        self.senders.push((node, dst, port, protocol, bytes, start));
    }

    fn install_receiver(&mut self, node: EngineNodeId, port: u16, tag: FlowId) {
        self.receivers.push((node, port, tag));
    }

    fn now(&self) -> Timestamp {
        self.now
    }

    fn run(&mut self, until: Duration, sink: &mut dyn ArrivalSink) {
        let mut script = std::mem::take(&mut self.script);
        script.sort_by_key(|&(_, _, ts)| ts);
        for (tag, bytes, ts) in script {
            if ts > until || self.stopped {
                break;
            }
            self.now = ts;
            sink.on_arrival(tag, bytes, ts);
        }
        self.now = self.now.max(until);
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

fn dumbbell_topo() -> Topology {
    let link = LinkSpec::new(5.mbps(), 10_000_000, QueueDiscipline::DropTail);
    let spec = TopoSpec {
        clusters: (0..4).map(|_| ClusterSpec::uniform(4, 4)).collect(),
        ncores: 2,
        segment: link,
        access: link,
        bottleneck: link,
    };
    TopologyBuilder::new(spec).build().unwrap()
}

#[test]
fn deploys_the_full_dumbbell_and_tracks_goodput() {
    logging::init_log();

    let topo = dumbbell_topo();
    assert_eq!(topo.num_nodes(), 70);

    let mut alloc = AddressAllocator::from_cidr("10.0.0.0/8").unwrap();
    let plan = assign_addresses(&topo, &mut alloc).unwrap();

    let mut builder = TrafficMatrixBuilder::new(1000, 0);
    let flows = builder
        .build(topo.index(), &PairingPolicy::ClusterShift { shift: 2 })
        .unwrap();
    assert_eq!(flows.len(), 64);

    let mut sim = ScriptedEngine::default();
    let mut tracker = FlowTracker::new();
    let deployment: Deployment = engine::deploy(&topo, &plan, &flows, &mut sim, &mut tracker);

    // every topology node got an engine node; every physical link and every
    // flow endpoint got installed
    assert_eq!(deployment.len(), 70);
    assert_eq!(sim.nodes, 70);
    assert_eq!(sim.links.len(), 64 + 4 + 1);
    assert_eq!(sim.senders.len(), 64);
    assert_eq!(sim.receivers.len(), 64);
    assert_eq!(tracker.len(), 64);

    // receivers carry their flow id as the tag, on the destination node
    for (f, &(node, port, tag)) in flows.iter().zip(sim.receivers.iter()) {
        assert_eq!(tag, f.id);
        assert_eq!(port, f.port);
        assert_eq!(node, deployment.handle(f.dst));
    }
    // senders aim at the destination's assigned address
    for (f, &(node, dst, _, protocol, bytes, _)) in flows.iter().zip(sim.senders.iter()) {
        assert_eq!(node, deployment.handle(f.src));
        assert_eq!(Some(dst), plan.primary_address(f.dst));
        assert_eq!(protocol, f.protocol);
        assert_eq!(bytes, 1000);
    }

    // script: flow 0 completes in two arrivals, flow 1 stalls short of the
    // target, flow 99... does not exist (64 flows), so tag 99 is dropped
    sim.script = vec![
        (0, 600, secs(1.2)),
        (99, 100, secs(1.3)),
        (1, 400, secs(1.4)),
        (0, 500, secs(1.5)),
        (0, 800, secs(1.9)),
    ];
    sim.run(secs(10.0), &mut tracker);

    let t0 = tracker.get(0).unwrap();
    assert_eq!(t0.phase(), Phase::Completed);
    assert_eq!(t0.recv_bytes(), 1100);
    assert_eq!(t0.end_time(), Some(secs(1.5)));
    // first arrival opened the flow at 1.2s, so 1100 bytes over 0.3s
    let rate = tracker.goodput(0).unwrap();
    assert!((rate - 1100.0 / 0.3).abs() < 1e-3);

    // the stalled flow stays active and reports incomplete
    assert_eq!(tracker.goodput(1), Err(FlowError::NotCompleted(1)));
    assert!(tracker.get(1).unwrap().is_valid());

    let report = tracker.report(secs(10.0), false);
    assert_eq!(report.completed, 1);
    assert_eq!(report.flows.len(), 64);
}

#[test]
fn scripted_arrivals_after_run_end_are_not_delivered() {
    logging::init_log();

    let topo = dumbbell_topo();
    let mut alloc = AddressAllocator::from_cidr("10.0.0.0/8").unwrap();
    let plan = assign_addresses(&topo, &mut alloc).unwrap();
    let mut builder = TrafficMatrixBuilder::new(1000, 0);
    let flows = builder
        .build(topo.index(), &PairingPolicy::ClusterShift { shift: 1 })
        .unwrap();

    let mut sim = ScriptedEngine::default();
    let mut tracker = FlowTracker::new();
    engine::deploy(&topo, &plan, &flows, &mut sim, &mut tracker);

    sim.script = vec![(2, 600, secs(1.0)), (2, 600, secs(12.0))];
    sim.run(secs(10.0), &mut tracker);

    // only the in-window arrival landed; the flow never completed
    let t = tracker.get(2).unwrap();
    assert_eq!(t.recv_bytes(), 600);
    assert_eq!(t.phase(), Phase::Active);

    // run-end report still lists it, excluded from the aggregate
    let report = tracker.report(secs(10.0), false);
    assert_eq!(report.completed, 0);
    assert!(report.mean_goodput.is_none());
}
