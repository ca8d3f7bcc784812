use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::{NodeIx, TopoIndex};
use crate::tracker::FlowId;
use crate::{Protocol, Timestamp};

pub const TCP_BASE_PORT: u16 = 8080;
pub const UDP_PORT: u16 = 9;

/// Flow start offsets are drawn uniformly from this window.
const START_WINDOW: Timestamp = 100_000_000; // 100ms

#[derive(Error, Debug)]
pub enum TrafficError {
    #[error("pair references unknown node id {0}")]
    UnknownNodeReference(usize),
}

/// One traffic instance to install and track.
#[derive(Debug, Clone)]
pub struct FlowDescriptor {
    pub id: FlowId,
    pub src: NodeIx,
    pub dst: NodeIx,
    pub protocol: Protocol,
    /// byte target; the flow counts as done once the sink has seen this many
    pub bytes: u64,
    pub port: u16,
    pub start: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPair {
    pub src: usize,
    pub dst: usize,
    pub protocol: Protocol,
}

/// Declarative pairing; no hidden state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "args")]
pub enum PairingPolicy {
    /// The k-th leaf of cluster i sends to the matching leaf of cluster
    /// (i + shift) mod nclusters, protocols alternating UDP/TCP by leaf
    /// ordinal.
    ClusterShift { shift: usize },
    /// An explicit (src, dst, protocol) node-id list.
    Explicit(Vec<FlowPair>),
}

/// Derives flow descriptors from the topology's index map and a pairing
/// policy. Flow ids are sequential and owned by this builder, so two
/// matrices built from one builder never collide.
#[derive(Debug)]
pub struct TrafficMatrixBuilder {
    bytes_per_flow: u64,
    seed: u64,
    next_id: FlowId,
}

impl TrafficMatrixBuilder {
    pub fn new(bytes_per_flow: u64, seed: u64) -> Self {
        TrafficMatrixBuilder {
            bytes_per_flow,
            seed,
            next_id: 0,
        }
    }

    pub fn build(
        &mut self,
        index: &TopoIndex,
        policy: &PairingPolicy,
    ) -> Result<Vec<FlowDescriptor>, TrafficError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut flows = Vec::new();

        match policy {
            PairingPolicy::ClusterShift { shift } => {
                let n = index.num_clusters();
                for c in 0..n {
                    let dst_cluster = (c + shift) % n;
                    let dsts: Vec<NodeIx> = index.cluster_leaves(dst_cluster).collect();
                    for (k, src) in index.cluster_leaves(c).enumerate() {
                        let dst = dsts[k % dsts.len()];
                        if src == dst {
                            // degenerate shift, a leaf never talks to itself
                            continue;
                        }
                        let protocol = if k % 2 == 0 {
                            Protocol::Udp
                        } else {
                            Protocol::Tcp
                        };
                        flows.push(self.descriptor(src, dst, protocol, &mut rng));
                    }
                }
            }
            PairingPolicy::Explicit(pairs) => {
                for p in pairs {
                    let src = NodeIx::new(p.src);
                    let dst = NodeIx::new(p.dst);
                    if !index.contains(src) {
                        return Err(TrafficError::UnknownNodeReference(p.src));
                    }
                    if !index.contains(dst) {
                        return Err(TrafficError::UnknownNodeReference(p.dst));
                    }
                    flows.push(self.descriptor(src, dst, p.protocol, &mut rng));
                }
            }
        }

        log::info!("traffic matrix: {} flows", flows.len());
        Ok(flows)
    }

    fn descriptor(
        &mut self,
        src: NodeIx,
        dst: NodeIx,
        protocol: Protocol,
        rng: &mut StdRng,
    ) -> FlowDescriptor {
        let id = self.next_id;
        self.next_id += 1;
        let port = match protocol {
            Protocol::Tcp => TCP_BASE_PORT + id as u16,
            Protocol::Udp => UDP_PORT,
        };
        FlowDescriptor {
            id,
            src,
            dst,
            protocol,
            bytes: self.bytes_per_flow,
            port,
            start: rng.gen_range(0..START_WINDOW),
        }
    }
}
