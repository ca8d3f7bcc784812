use fnv::FnvBuildHasher;
use indexmap::IndexMap;
use log::{debug, trace};
use thiserror::Error;

use crate::{Timestamp, ToStdDuration};

type HashMap<K, V> = IndexMap<K, V, FnvBuildHasher>;

pub type FlowId = usize;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FlowError {
    #[error("no tracker registered for flow {0}")]
    UnknownFlowId(FlowId),
    #[error("flow {0} has not completed")]
    NotCompleted(FlowId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// registered, start event not fired yet
    Pending,
    /// accumulating bytes
    Active,
    /// byte target reached; terminal, never reverts
    Completed,
}

/// Completion state for one flow. Mutated exclusively by arrival events,
/// finalized at most once, read-only after the run.
#[derive(Debug, Clone)]
pub struct GoodputTracker {
    flow: FlowId,
    threshold: u64,
    recv_bytes: u64,
    start: Timestamp,
    end: Option<Timestamp>,
    phase: Phase,
}

impl GoodputTracker {
    fn new(flow: FlowId, threshold: u64) -> Self {
        GoodputTracker {
            flow,
            threshold,
            recv_bytes: 0,
            start: 0,
            end: None,
            phase: Phase::Pending,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    #[inline]
    pub fn start_time(&self) -> Timestamp {
        self.start
    }

    #[inline]
    pub fn end_time(&self) -> Option<Timestamp> {
        self.end
    }

    /// Still accumulating.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.phase == Phase::Active
    }

    /// bytes/sec over [start, end]; `None` until completed.
    pub fn goodput(&self) -> Option<f64> {
        self.end.map(|end| {
            // a flow completing on its first arrival has zero elapsed time
            let dura = (end - self.start).max(1);
            self.recv_bytes as f64 * 1e9 / dura as f64
        })
    }

    fn rate_until(&self, run_end: Timestamp) -> Option<f64> {
        if self.phase != Phase::Active || run_end <= self.start {
            return None;
        }
        Some(self.recv_bytes as f64 * 1e9 / (run_end - self.start) as f64)
    }
}

/// One entry of a post-run report.
#[derive(Debug, Clone)]
pub struct FlowReport {
    pub flow: FlowId,
    pub phase: Phase,
    pub bytes: u64,
    /// `None` for flows that never completed (unless the caller asked for
    /// partial rates)
    pub goodput: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub flows: Vec<FlowReport>,
    pub completed: usize,
    /// mean goodput over the counted flows
    pub mean_goodput: Option<f64>,
}

/// Owns one `GoodputTracker` per flow for a single simulation run; no
/// process-wide state. The engine delivers arrivals tagged with the flow id
/// the sink was registered under.
#[derive(Debug, Default)]
pub struct FlowTracker {
    trackers: HashMap<FlowId, GoodputTracker>,
}

impl FlowTracker {
    pub fn new() -> Self {
        Default::default()
    }

    /// Register a flow before the run starts.
    pub fn register(&mut self, flow: FlowId, threshold: u64) {
        let old = self.trackers.insert(flow, GoodputTracker::new(flow, threshold));
        assert!(old.is_none(), "repeated flow id: {}", flow);
    }

    /// The flow's start event. Re-starting an already running flow is a
    /// no-op.
    pub fn start(&mut self, flow: FlowId, ts: Timestamp) -> Result<(), FlowError> {
        let t = self
            .trackers
            .get_mut(&flow)
            .ok_or(FlowError::UnknownFlowId(flow))?;
        if t.phase == Phase::Pending {
            t.start = ts;
            t.phase = Phase::Active;
            debug!("flow {} started at {:?}", flow, ts.to_dura());
        }
        Ok(())
    }

    /// Account one sink arrival. Exactly one Active -> Completed transition
    /// happens, at the arrival whose running sum first reaches the
    /// threshold; anything delivered after that is silently ignored.
    pub fn on_packet_arrival(
        &mut self,
        flow: FlowId,
        bytes: u64,
        ts: Timestamp,
    ) -> Result<(), FlowError> {
        let t = self
            .trackers
            .get_mut(&flow)
            .ok_or(FlowError::UnknownFlowId(flow))?;
        match t.phase {
            Phase::Completed => {
                trace!("flow {}: arrival after completion ignored", flow);
                return Ok(());
            }
            Phase::Pending => {
                // no explicit start event; the first arrival opens the flow
                t.start = ts;
                t.phase = Phase::Active;
            }
            Phase::Active => {}
        }
        t.recv_bytes += bytes;
        trace!(
            "flow {}: +{} bytes at {:?}, total {}",
            flow,
            bytes,
            ts.to_dura(),
            t.recv_bytes
        );
        if t.recv_bytes >= t.threshold {
            t.end = Some(ts);
            t.phase = Phase::Completed;
            debug!(
                "flow {} completed at {:?} with {} bytes",
                flow,
                ts.to_dura(),
                t.recv_bytes
            );
        }
        Ok(())
    }

    /// bytes/sec for a completed flow.
    pub fn goodput(&self, flow: FlowId) -> Result<f64, FlowError> {
        let t = self
            .trackers
            .get(&flow)
            .ok_or(FlowError::UnknownFlowId(flow))?;
        match t.goodput() {
            Some(rate) => Ok(rate),
            None => Err(FlowError::NotCompleted(flow)),
        }
    }

    #[inline]
    pub fn get(&self, flow: FlowId) -> Option<&GoodputTracker> {
        self.trackers.get(&flow)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GoodputTracker> {
        self.trackers.values()
    }

    /// Post-run summary. Flows still Pending/Active at `run_end` are listed
    /// but excluded from the aggregate, unless `include_incomplete` asks for
    /// their partial rates against the run end.
    pub fn report(&self, run_end: Timestamp, include_incomplete: bool) -> RunReport {
        let mut flows = Vec::with_capacity(self.trackers.len());
        let mut completed = 0;
        let mut rates = Vec::new();
        for t in self.trackers.values() {
            let goodput = match t.phase {
                Phase::Completed => {
                    completed += 1;
                    t.goodput()
                }
                _ if include_incomplete => t.rate_until(run_end),
                _ => None,
            };
            if let Some(r) = goodput {
                rates.push(r);
            }
            flows.push(FlowReport {
                flow: t.flow,
                phase: t.phase,
                bytes: t.recv_bytes,
                goodput,
            });
        }
        let mean_goodput = if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64)
        };
        RunReport {
            flows,
            completed,
            mean_goodput,
        }
    }
}
