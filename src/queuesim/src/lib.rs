use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bandwidth;

pub mod topology;

pub mod addr;

pub mod traffic;

pub mod tracker;

pub mod engine;

pub mod config;

pub use addr::{assign_addresses, AddressAllocator, AddressingPlan};
pub use bandwidth::{Bandwidth, BandwidthTrait};
pub use topology::{Topology, TopologyBuilder};
pub use tracker::{FlowId, FlowTracker};
pub use traffic::{FlowDescriptor, TrafficMatrixBuilder};

// nanoseconds
pub type Timestamp = u64;
pub type Duration = u64;

pub trait ToStdDuration {
    fn to_dura(self) -> std::time::Duration;
}

impl ToStdDuration for u64 {
    #[inline]
    fn to_dura(self) -> std::time::Duration {
        std::time::Duration::new(self / 1_000_000_000, (self % 1_000_000_000) as u32)
    }
}

/// Convert seconds (as configs express durations) to the internal
/// nanosecond timestamps.
#[inline]
pub fn secs(s: f64) -> Duration {
    (s * 1e9).round() as Duration
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Which queueing discipline the engine should install on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueDiscipline {
    DropTail,
    Red,
    CoDel,
}

impl std::default::Default for QueueDiscipline {
    fn default() -> Self {
        Self::DropTail
    }
}

impl std::fmt::Display for QueueDiscipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueDiscipline::DropTail => write!(f, "droptail"),
            QueueDiscipline::Red => write!(f, "red"),
            QueueDiscipline::CoDel => write!(f, "codel"),
        }
    }
}

impl std::str::FromStr for QueueDiscipline {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "droptail" | "drop-tail" | "pfifo" => Ok(QueueDiscipline::DropTail),
            "red" => Ok(QueueDiscipline::Red),
            "codel" => Ok(QueueDiscipline::CoDel),
            other => Err(format!("unknown queue discipline: {}", other)),
        }
    }
}

/// Any error that can abort the setup phase. Everything here is a
/// configuration defect; there is nothing to retry.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Topology(#[from] topology::TopologyError),
    #[error(transparent)]
    Addr(#[from] addr::AddrError),
    #[error(transparent)]
    Traffic(#[from] traffic::TrafficError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secs_round_trips_through_ns() {
        assert_eq!(secs(1.5), 1_500_000_000);
        assert_eq!(secs(1.5).to_dura(), std::time::Duration::from_millis(1500));
    }

    #[test]
    fn qdisc_parses_case_insensitively() {
        assert_eq!("RED".parse::<QueueDiscipline>(), Ok(QueueDiscipline::Red));
        assert!("fq".parse::<QueueDiscipline>().is_err());
    }
}
