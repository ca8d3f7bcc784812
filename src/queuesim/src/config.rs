use serde::{Deserialize, Serialize};

use crate::bandwidth::BandwidthTrait;
use crate::topology::{ClusterSpec, LinkSpec, TopoSpec};
use crate::traffic::PairingPolicy;
use crate::QueueDiscipline;

/// Link attributes as configs write them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Mb/s
    pub bandwidth_mbps: f64,
    pub delay_ms: u64,
}

impl LinkConfig {
    fn to_spec(&self, qdisc: QueueDiscipline, rate_scale: f64) -> LinkSpec {
        LinkSpec::new(
            self.bandwidth_mbps.mbps().scale(rate_scale),
            self.delay_ms * 1_000_000,
            qdisc,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub spokes: usize,
    pub leaves: usize,
    /// overrides the default hub uplink for this cluster only
    #[serde(default)]
    pub access: Option<LinkConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Per-cluster shapes; each entry is one hub with its spokes
    pub clusters: Vec<ClusterConfig>,

    /// 1 for a single core, 2 for the dumbbell
    pub cores: usize,

    /// Broadcast segment attributes (leaves <-> hub)
    pub segment: LinkConfig,

    /// Default hub uplink attributes
    pub access: LinkConfig,

    /// The bottleneck link between the two cores
    pub bottleneck: LinkConfig,

    /// Queue discipline installed on every link
    #[serde(default)]
    pub queue: QueueDiscipline,

    /// Address superblock in CIDR notation, e.g. "10.0.0.0/8"
    pub superblock: String,

    /// How sources pair with destinations
    pub pairing: PairingPolicy,

    /// Per-flow byte target
    pub flow_bytes: u64,

    /// Run duration in seconds
    pub duration_secs: f64,

    /// Multiply every configured link rate; default 1.0
    #[serde(default)]
    pub rate_scale: Option<f64>,

    /// Seed for flow start offsets
    #[serde(default)]
    pub seed: u64,

    /// Enable packet traces at the sinks
    #[serde(default)]
    pub trace: bool,

    /// Base filename traces are written under when enabled
    #[serde(default)]
    pub trace_file: Option<String>,
}

impl ExperimentConfig {
    pub fn topo_spec(&self) -> TopoSpec {
        let scale = self.rate_scale.unwrap_or(1.0);
        TopoSpec {
            clusters: self
                .clusters
                .iter()
                .map(|c| ClusterSpec {
                    nspokes: c.spokes,
                    leaves_per_spoke: c.leaves,
                    access: c.access.map(|l| l.to_spec(self.queue, scale)),
                })
                .collect(),
            ncores: self.cores,
            segment: self.segment.to_spec(self.queue, scale),
            access: self.access.to_spec(self.queue, scale),
            bottleneck: self.bottleneck.to_spec(self.queue, scale),
        }
    }
}

pub fn read_config<P: AsRef<std::path::Path>>(path: P) -> ExperimentConfig {
    use std::io::Read;
    let mut file = std::fs::File::open(path).expect("fail to open file");
    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    toml::from_str(&content).expect("parse failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyBuilder;
    use crate::BandwidthTrait;

    const EXAMPLE: &str = r#"
cores = 2
superblock = "10.0.0.0/8"
flow_bytes = 1000
duration_secs = 10.0
queue = "Red"
rate_scale = 2.0

segment = { bandwidth_mbps = 5.0, delay_ms = 2 }
access = { bandwidth_mbps = 5.0, delay_ms = 10 }
bottleneck = { bandwidth_mbps = 5.0, delay_ms = 10 }

[[clusters]]
spokes = 4
leaves = 4

[[clusters]]
spokes = 4
leaves = 4
access = { bandwidth_mbps = 1.0, delay_ms = 20 }

[pairing]
type = "ClusterShift"

[pairing.args]
shift = 1
"#;

    #[test]
    fn example_config_parses_and_builds() {
        let config: ExperimentConfig = toml::from_str(EXAMPLE).unwrap();
        assert_eq!(config.queue, QueueDiscipline::Red);
        assert!(matches!(
            config.pairing,
            PairingPolicy::ClusterShift { shift: 1 }
        ));

        let spec = config.topo_spec();
        // rate_scale doubles every rate
        assert_eq!(spec.segment.bandwidth, 10.mbps());
        assert_eq!(spec.clusters[1].access.unwrap().bandwidth, 2.mbps());
        assert_eq!(spec.clusters[1].access.unwrap().delay, 20_000_000);

        let topo = TopologyBuilder::new(spec).build().unwrap();
        assert_eq!(topo.index().num_leaves(), 32);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let bad = format!("bogus_knob = 1\n{}", EXAMPLE);
        assert!(toml::from_str::<ExperimentConfig>(&bad).is_err());
    }
}
