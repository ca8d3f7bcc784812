use std::net::Ipv4Addr;

use fnv::FnvHashMap as HashMap;
use log::{debug, warn};

use crate::addr::AddressingPlan;
use crate::topology::{LinkSpec, NodeIx, Topology};
use crate::tracker::{FlowId, FlowTracker};
use crate::traffic::FlowDescriptor;
use crate::{Duration, Protocol, Timestamp};

/// Engine-side node handle, opaque to this crate.
pub type EngineNodeId = usize;

/// Where sink arrivals land. The tag is the flow id the receiver was
/// registered with, delivered verbatim with every arrival; nothing is
/// recovered from event paths.
pub trait ArrivalSink {
    fn on_arrival(&mut self, tag: FlowId, bytes: u64, ts: Timestamp);
}

impl ArrivalSink for FlowTracker {
    fn on_arrival(&mut self, tag: FlowId, bytes: u64, ts: Timestamp) {
        // an unknown tag is a dropped event, never a run failure
        if let Err(e) = self.on_packet_arrival(tag, bytes, ts) {
            warn!("dropping arrival event: {}", e);
        }
    }
}

/// What the discrete-event platform must provide. The virtual clock, the
/// event queue, and the actual protocol stacks all live behind this trait;
/// callbacks arrive strictly in non-decreasing timestamp order.
pub trait SimulationEngine {
    fn create_node(&mut self) -> EngineNodeId;
    fn install_link(&mut self, a: EngineNodeId, b: EngineNodeId, spec: &LinkSpec);
    fn install_sender(
        &mut self,
        node: EngineNodeId,
        dst: Ipv4Addr,
        port: u16,
        protocol: Protocol,
        bytes: u64,
        start: Timestamp,
    );
    fn install_receiver(&mut self, node: EngineNodeId, port: u16, tag: FlowId);
    fn now(&self) -> Timestamp;
    fn run(&mut self, until: Duration, sink: &mut dyn ArrivalSink);
    fn stop(&mut self);
}

/// Topology-node to engine-node mapping produced by `deploy`.
#[derive(Debug, Default)]
pub struct Deployment {
    handles: HashMap<NodeIx, EngineNodeId>,
}

impl Deployment {
    #[inline]
    pub fn handle(&self, ix: NodeIx) -> EngineNodeId {
        *self
            .handles
            .get(&ix)
            .unwrap_or_else(|| panic!("node {:?} was not deployed", ix))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Mirror the built topology into the engine and install one
/// sender/receiver pair per flow. Receivers are tagged with their flow id;
/// senders aim at the destination's primary address. Trackers are
/// registered with each flow's byte target.
pub fn deploy(
    topo: &Topology,
    plan: &AddressingPlan,
    flows: &[FlowDescriptor],
    engine: &mut impl SimulationEngine,
    tracker: &mut FlowTracker,
) -> Deployment {
    let mut deployment = Deployment::default();

    for ix in topo.all_nodes() {
        deployment.handles.insert(ix, engine.create_node());
    }

    for link_ix in topo.physical_links() {
        let a = topo.get_source(link_ix);
        let b = topo.get_target(link_ix);
        engine.install_link(
            deployment.handle(a),
            deployment.handle(b),
            &topo[link_ix].spec(),
        );
    }

    for f in flows {
        tracker.register(f.id, f.bytes);
        engine.install_receiver(deployment.handle(f.dst), f.port, f.id);
        let dst_addr = plan
            .primary_address(f.dst)
            .unwrap_or_else(|| panic!("no address assigned to {}", topo[f.dst].name));
        engine.install_sender(
            deployment.handle(f.src),
            dst_addr,
            f.port,
            f.protocol,
            f.bytes,
            f.start,
        );
        debug!(
            "flow {}: {} -> {} ({}:{}, {} bytes, {})",
            f.id, topo[f.src].name, topo[f.dst].name, dst_addr, f.port, f.bytes, f.protocol
        );
    }

    deployment
}
