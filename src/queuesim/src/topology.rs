use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

use lazy_static::lazy_static;
use petgraph::{
    dot::Dot,
    graph::{EdgeIndex, EdgeIndices, Graph, NodeIndex},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bandwidth::Bandwidth;
use crate::{Duration, QueueDiscipline};

lazy_static! {
    static ref LINK_ID: AtomicUsize = AtomicUsize::new(0);
}

pub type NodeIx = NodeIndex;
pub type LinkIx = EdgeIndex;
pub type LinkIxIter = EdgeIndices;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("topology needs at least one cluster")]
    NoClusters,
    #[error("cluster {0}: a cluster hub aggregates at least 2 spokes, got {1}")]
    TooFewSpokes(usize, usize),
    #[error("cluster {0} spoke {1}: a broadcast segment needs at least 2 members, got {2}")]
    SpokeTooSmall(usize, usize, usize),
    #[error("core count must be 1 or 2, got {0}")]
    BadCoreCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeType {
    Leaf,
    Hub,
    Core,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// 1: core, 2: hub, 3: leaf
    pub depth: usize,
    pub node_type: NodeType,
}

impl Node {
    #[inline]
    pub fn new(name: &str, depth: usize, node_type: NodeType) -> Node {
        Node {
            name: name.to_owned(),
            depth,
            node_type,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self.node_type, NodeType::Leaf)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// The attributes a link is installed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub bandwidth: Bandwidth,
    pub delay: Duration,
    pub qdisc: QueueDiscipline,
}

impl LinkSpec {
    #[inline]
    pub fn new(bandwidth: Bandwidth, delay: Duration, qdisc: QueueDiscipline) -> Self {
        LinkSpec {
            bandwidth,
            delay,
            qdisc,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    id: usize,
    pub bandwidth: Bandwidth,
    pub delay: Duration,
    pub qdisc: QueueDiscipline,
}

impl Link {
    #[inline]
    pub fn new(spec: &LinkSpec) -> Link {
        Link {
            id: LINK_ID.fetch_add(1, SeqCst),
            bandwidth: spec.bandwidth,
            delay: spec.delay,
            qdisc: spec.qdisc,
        }
    }

    #[inline]
    pub fn spec(&self) -> LinkSpec {
        LinkSpec::new(self.bandwidth, self.delay, self.qdisc)
    }
}

impl std::fmt::Display for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {}ms / {}",
            self.bandwidth,
            self.delay / 1_000_000,
            self.qdisc
        )
    }
}

impl std::cmp::PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Link {}

impl std::hash::Hash for Link {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// One address-bearing segment of the topology, in the order blocks are
/// carved out of the superblock: all spoke segments, then the hub uplinks,
/// then the core bottleneck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    Spoke { cluster: usize, spoke: usize },
    Access { cluster: usize },
    Core,
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Spoke { cluster, spoke } => write!(f, "spoke_{}_{}", cluster, spoke),
            Segment::Access { cluster } => write!(f, "access_{}", cluster),
            Segment::Core => write!(f, "core"),
        }
    }
}

/// Per-cluster shape. `access` overrides the default hub uplink attributes,
/// so a single cluster can sit behind a slower link than the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub nspokes: usize,
    pub leaves_per_spoke: usize,
    pub access: Option<LinkSpec>,
}

impl ClusterSpec {
    pub fn uniform(nspokes: usize, leaves_per_spoke: usize) -> Self {
        ClusterSpec {
            nspokes,
            leaves_per_spoke,
            access: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopoSpec {
    pub clusters: Vec<ClusterSpec>,
    pub ncores: usize,
    /// broadcast segment each spoke's leaves share with the hub
    pub segment: LinkSpec,
    /// default hub-to-core point-to-point link
    pub access: LinkSpec,
    /// the dumbbell link between the two cores
    pub bottleneck: LinkSpec,
}

/// The explicit map from (cluster, spoke, leaf) coordinates and hub/core
/// roles to graph indices. All offset queries go through here; callers
/// never recompute node positions by arithmetic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopoIndex {
    leaves: Vec<Vec<Vec<NodeIx>>>,
    hubs: Vec<NodeIx>,
    cores: Vec<NodeIx>,
}

impl TopoIndex {
    #[inline]
    pub fn leaf(&self, cluster: usize, spoke: usize, leaf: usize) -> Option<NodeIx> {
        self.leaves.get(cluster)?.get(spoke)?.get(leaf).copied()
    }

    #[inline]
    pub fn hub(&self, cluster: usize) -> Option<NodeIx> {
        self.hubs.get(cluster).copied()
    }

    #[inline]
    pub fn core(&self, k: usize) -> Option<NodeIx> {
        self.cores.get(k).copied()
    }

    /// Which core a cluster's hub hangs off. With two cores the first half
    /// of the clusters goes to core 0, the rest to core 1.
    pub fn core_of_cluster(&self, cluster: usize) -> Option<NodeIx> {
        if cluster >= self.hubs.len() {
            return None;
        }
        let k = if self.cores.len() == 2 && cluster >= (self.hubs.len() + 1) / 2 {
            1
        } else {
            0
        };
        self.core(k)
    }

    #[inline]
    pub fn num_clusters(&self) -> usize {
        self.hubs.len()
    }

    #[inline]
    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves
            .iter()
            .map(|c| c.iter().map(|s| s.len()).sum::<usize>())
            .sum()
    }

    /// All leaves of one cluster, spoke by spoke.
    pub fn cluster_leaves(&self, cluster: usize) -> impl Iterator<Item = NodeIx> + '_ {
        self.leaves
            .get(cluster)
            .into_iter()
            .flat_map(|c| c.iter().flat_map(|s| s.iter().copied()))
    }

    pub fn contains(&self, ix: NodeIx) -> bool {
        self.hubs.contains(&ix)
            || self.cores.contains(&ix)
            || self
                .leaves
                .iter()
                .any(|c| c.iter().any(|s| s.contains(&ix)))
    }
}

/// The built network shape: immutable graph plus the index map and the
/// ordered segment list used for address assignment.
#[derive(Debug, Clone)]
pub struct Topology {
    graph: Graph<Node, Link>,
    index: TopoIndex,
    segments: Vec<(Segment, Vec<NodeIx>)>,
}

impl Topology {
    #[inline]
    pub fn index(&self) -> &TopoIndex {
        &self.index
    }

    /// Segments in allocation order, each with its member interfaces.
    #[inline]
    pub fn segments(&self) -> &[(Segment, Vec<NodeIx>)] {
        &self.segments
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn all_nodes(&self) -> petgraph::graph::NodeIndices {
        self.graph.node_indices()
    }

    pub fn all_links(&self) -> LinkIxIter {
        self.graph.edge_indices()
    }

    /// Each physical link once. Links are stored as paired directed edges,
    /// forward edges at even indices.
    pub fn physical_links(&self) -> impl Iterator<Item = LinkIx> + '_ {
        self.graph.edge_indices().filter(|ix| ix.index() % 2 == 0)
    }

    #[inline]
    pub fn get_reverse_link(&self, ix: LinkIx) -> LinkIx {
        LinkIx::new(ix.index() ^ 1)
    }

    #[inline]
    pub fn get_source(&self, ix: LinkIx) -> NodeIx {
        self.graph.raw_edges()[ix.index()].source()
    }

    #[inline]
    pub fn get_target(&self, ix: LinkIx) -> NodeIx {
        self.graph.raw_edges()[ix.index()].target()
    }

    pub fn find_link(&self, ix: NodeIx, iy: NodeIx) -> Option<LinkIx> {
        self.graph.find_edge(ix, iy)
    }

    pub fn to_dot(&self) -> Dot<&Graph<Node, Link>> {
        Dot::with_config(&self.graph, &[])
    }
}

impl Index<NodeIx> for Topology {
    type Output = Node;
    fn index(&self, index: NodeIx) -> &Self::Output {
        &self.graph[index]
    }
}

impl Index<LinkIx> for Topology {
    type Output = Link;
    fn index(&self, index: LinkIx) -> &Self::Output {
        &self.graph[index]
    }
}

impl IndexMut<LinkIx> for Topology {
    fn index_mut(&mut self, index: LinkIx) -> &mut Self::Output {
        &mut self.graph[index]
    }
}

/// Builds the star-of-stars + dumbbell shape from a `TopoSpec`: spokes
/// bottom-up under each cluster hub, every hub wired to a core over a
/// dedicated point-to-point link, and the bottleneck between the two cores
/// when a dumbbell is requested.
#[derive(Debug, Clone)]
pub struct TopologyBuilder {
    spec: TopoSpec,
}

impl TopologyBuilder {
    pub fn new(spec: TopoSpec) -> Self {
        TopologyBuilder { spec }
    }

    fn validate(&self) -> Result<(), TopologyError> {
        let spec = &self.spec;
        if spec.clusters.is_empty() {
            return Err(TopologyError::NoClusters);
        }
        for (c, cl) in spec.clusters.iter().enumerate() {
            if cl.nspokes < 2 {
                return Err(TopologyError::TooFewSpokes(c, cl.nspokes));
            }
            // spoke members = leaves + the hub itself
            if cl.leaves_per_spoke + 1 < 2 {
                return Err(TopologyError::SpokeTooSmall(c, 0, cl.leaves_per_spoke + 1));
            }
        }
        if spec.ncores == 0 || spec.ncores > 2 {
            return Err(TopologyError::BadCoreCount(spec.ncores));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Topology, TopologyError> {
        self.validate()?;
        let spec = &self.spec;

        let mut graph: Graph<Node, Link> = Graph::new();
        let mut index = TopoIndex::default();
        let mut segments: Vec<(Segment, Vec<NodeIx>)> = Vec::new();

        // paired directed edges, forward first; reverse = ix ^ 1
        let add_link = |graph: &mut Graph<Node, Link>, a: NodeIx, b: NodeIx, ls: &LinkSpec| {
            let l1 = graph.add_edge(a, b, Link::new(ls));
            let l2 = graph.add_edge(b, a, Link::new(ls));
            debug_assert_eq!(l1.index() ^ 1, l2.index());
            l1
        };

        // spokes bottom-up, then the hub aggregates them
        for (c, cl) in spec.clusters.iter().enumerate() {
            let hub = graph.add_node(Node::new(&format!("hub_{}", c), 2, NodeType::Hub));
            index.hubs.push(hub);
            index.leaves.push(Vec::with_capacity(cl.nspokes));

            for s in 0..cl.nspokes {
                let mut members = Vec::with_capacity(cl.leaves_per_spoke + 1);
                let mut spoke_leaves = Vec::with_capacity(cl.leaves_per_spoke);
                for l in 0..cl.leaves_per_spoke {
                    let name = format!("leaf_{}_{}_{}", c, s, l);
                    let leaf = graph.add_node(Node::new(&name, 3, NodeType::Leaf));
                    // the broadcast segment puts every leaf one hop from the hub
                    add_link(&mut graph, hub, leaf, &spec.segment);
                    spoke_leaves.push(leaf);
                    members.push(leaf);
                }
                members.push(hub);
                index.leaves[c].push(spoke_leaves);
                segments.push((Segment::Spoke { cluster: c, spoke: s }, members));
            }
            log::debug!(
                "cluster {}: {} spokes x {} leaves",
                c,
                cl.nspokes,
                cl.leaves_per_spoke
            );
        }

        for k in 0..spec.ncores {
            let core = graph.add_node(Node::new(&format!("core_{}", k), 1, NodeType::Core));
            index.cores.push(core);
        }

        // hub uplinks; the index decides which core each cluster joins
        for (c, cl) in spec.clusters.iter().enumerate() {
            let hub = index.hubs[c];
            let core = index
                .core_of_cluster(c)
                .unwrap_or_else(|| panic!("no core for cluster {}", c));
            let ls = cl.access.as_ref().unwrap_or(&spec.access);
            add_link(&mut graph, hub, core, ls);
            segments.push((Segment::Access { cluster: c }, vec![hub, core]));
        }

        if spec.ncores == 2 {
            let (c0, c1) = (index.cores[0], index.cores[1]);
            add_link(&mut graph, c0, c1, &spec.bottleneck);
            segments.push((Segment::Core, vec![c0, c1]));
            log::debug!("dumbbell bottleneck: {}", spec.bottleneck.bandwidth);
        }

        log::info!(
            "built topology: {} leaves, {} hubs, {} cores",
            index.num_leaves(),
            index.num_clusters(),
            index.num_cores()
        );

        Ok(Topology {
            graph,
            index,
            segments,
        })
    }
}
