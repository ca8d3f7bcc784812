use std::net::Ipv4Addr;

use fnv::FnvHashMap as HashMap;
use thiserror::Error;

use crate::topology::{NodeIx, Segment, Topology};

#[derive(Error, Debug)]
pub enum AddrError {
    #[error("malformed CIDR block: {0}")]
    BadCidr(String),
    #[error("prefix /{0} cannot be carved out of a /{1} superblock")]
    InvalidPrefix(u8, u8),
    #[error("address space exhausted: no room for a /{prefix} in {superblock}/{superblock_prefix}")]
    SpaceExhausted {
        prefix: u8,
        superblock: Ipv4Addr,
        superblock_prefix: u8,
    },
    #[error("block {network}/{prefix} has no host addresses left")]
    BlockExhausted { network: Ipv4Addr, prefix: u8 },
}

/// One subnet handed to a segment. Host addresses are assigned by a
/// monotone cursor that starts past the network address and stops before
/// the broadcast address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBlock {
    network: Ipv4Addr,
    prefix: u8,
    cursor: u32,
}

impl AddressBlock {
    fn new(network: Ipv4Addr, prefix: u8) -> Self {
        AddressBlock {
            network,
            prefix,
            cursor: 1,
        }
    }

    #[inline]
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    #[inline]
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(!0u32 << (32 - self.prefix))
    }

    #[inline]
    pub fn size(&self) -> u32 {
        1u32 << (32 - self.prefix)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let base = u32::from(self.network);
        let a = u32::from(addr);
        a >= base && a - base < self.size()
    }

    /// Next host address within the block.
    pub fn assign(&mut self) -> Result<Ipv4Addr, AddrError> {
        if self.cursor >= self.size() - 1 {
            return Err(AddrError::BlockExhausted {
                network: self.network,
                prefix: self.prefix,
            });
        }
        let addr = Ipv4Addr::from(u32::from(self.network) + self.cursor);
        self.cursor += 1;
        Ok(addr)
    }
}

impl std::fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Carves disjoint blocks out of one configured superblock. The cursor only
/// moves forward (aligned up to each requested block size), so prefix space
/// already handed out is never reused, and identical request sequences over
/// a fresh allocator always return identical blocks.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    base: u32,
    prefix: u8,
    /// offset of the next free address from `base`
    cursor: u32,
}

impl AddressAllocator {
    pub fn new(superblock: Ipv4Addr, prefix: u8) -> Self {
        assert!(prefix >= 1 && prefix <= 30, "bad superblock prefix: {}", prefix);
        let mask = !0u32 << (32 - prefix);
        AddressAllocator {
            base: u32::from(superblock) & mask,
            prefix,
            cursor: 0,
        }
    }

    /// Parse "10.0.0.0/16" style notation, as configs write it.
    pub fn from_cidr(s: &str) -> Result<Self, AddrError> {
        let bad = || AddrError::BadCidr(s.to_owned());
        let mut parts = s.splitn(2, '/');
        let addr: Ipv4Addr = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let prefix: u8 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        if prefix < 1 || prefix > 30 {
            return Err(bad());
        }
        Ok(Self::new(addr, prefix))
    }

    #[inline]
    pub fn superblock(&self) -> (Ipv4Addr, u8) {
        (Ipv4Addr::from(self.base), self.prefix)
    }

    /// Next disjoint block of the requested size.
    pub fn request_block(&mut self, prefix: u8) -> Result<AddressBlock, AddrError> {
        if prefix < self.prefix || prefix > 30 {
            return Err(AddrError::InvalidPrefix(prefix, self.prefix));
        }
        let size = 1u32 << (32 - prefix);
        let aligned = self
            .cursor
            .checked_add(size - 1)
            .map(|c| c & !(size - 1))
            .ok_or_else(|| self.exhausted(prefix))?;
        let total = 1u64 << (32 - self.prefix);
        if aligned as u64 + size as u64 > total {
            return Err(self.exhausted(prefix));
        }
        self.cursor = aligned + size;
        let block = AddressBlock::new(Ipv4Addr::from(self.base + aligned), prefix);
        log::debug!("allocated {}", block);
        Ok(block)
    }

    /// Smallest block with room for `hosts` interfaces plus the network and
    /// broadcast addresses.
    pub fn request_block_for(&mut self, hosts: u32) -> Result<AddressBlock, AddrError> {
        let mut prefix = 30u8;
        while prefix > self.prefix && (1u64 << (32 - prefix)) < hosts as u64 + 2 {
            prefix -= 1;
        }
        if (1u64 << (32 - prefix)) < hosts as u64 + 2 {
            return Err(self.exhausted(prefix));
        }
        self.request_block(prefix)
    }

    fn exhausted(&self, prefix: u8) -> AddrError {
        AddrError::SpaceExhausted {
            prefix,
            superblock: Ipv4Addr::from(self.base),
            superblock_prefix: self.prefix,
        }
    }
}

/// Every interface's address, keyed by (node, segment): a hub shows up once
/// per spoke it belongs to plus once on its uplink.
#[derive(Debug, Clone, Default)]
pub struct AddressingPlan {
    blocks: Vec<(Segment, AddressBlock)>,
    by_interface: HashMap<(NodeIx, Segment), Ipv4Addr>,
    primary: HashMap<NodeIx, Ipv4Addr>,
}

impl AddressingPlan {
    #[inline]
    pub fn address_of(&self, node: NodeIx, segment: Segment) -> Option<Ipv4Addr> {
        self.by_interface.get(&(node, segment)).copied()
    }

    /// The address a node is reached at: its first assigned interface (for
    /// a leaf, its spoke segment address).
    #[inline]
    pub fn primary_address(&self, node: NodeIx) -> Option<Ipv4Addr> {
        self.primary.get(&node).copied()
    }

    #[inline]
    pub fn blocks(&self) -> &[(Segment, AddressBlock)] {
        &self.blocks
    }
}

/// Walk the topology's segments in order and give every member interface
/// exactly one address. Spoke segments come first, so core-link blocks are
/// carved after the leaf segments are done.
pub fn assign_addresses(
    topo: &Topology,
    alloc: &mut AddressAllocator,
) -> Result<AddressingPlan, AddrError> {
    let mut plan = AddressingPlan::default();
    for (seg, members) in topo.segments() {
        let mut block = alloc.request_block_for(members.len() as u32)?;
        for &ix in members {
            let addr = block.assign()?;
            log::trace!("{} [{}] <- {}", topo[ix].name, seg, addr);
            plan.by_interface.insert((ix, *seg), addr);
            plan.primary.entry(ix).or_insert(addr);
        }
        log::debug!("segment {} <- {}", seg, block);
        plan.blocks.push((*seg, block));
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ClusterSpec, LinkSpec, TopoSpec, TopologyBuilder};
    use crate::{BandwidthTrait, QueueDiscipline};

    #[test]
    fn four_slash24s_fit_in_a_slash22_and_a_fifth_does_not() {
        let mut alloc = AddressAllocator::from_cidr("10.0.0.0/22").unwrap();
        let mut blocks = Vec::new();
        for _ in 0..4 {
            blocks.push(alloc.request_block(24).unwrap());
        }
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                assert!(!a.contains(b.network()), "{} overlaps {}", a, b);
            }
        }
        assert!(matches!(
            alloc.request_block(24),
            Err(AddrError::SpaceExhausted { prefix: 24, .. })
        ));
    }

    #[test]
    fn identical_request_sequences_yield_identical_blocks() {
        let run = || {
            let mut alloc = AddressAllocator::from_cidr("10.0.0.0/16").unwrap();
            vec![
                alloc.request_block(24).unwrap(),
                alloc.request_block(26).unwrap(),
                alloc.request_block(24).unwrap(),
                alloc.request_block_for(100).unwrap(),
            ]
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn mixed_sizes_stay_disjoint_and_aligned() {
        let mut alloc = AddressAllocator::from_cidr("10.0.0.0/16").unwrap();
        let a = alloc.request_block(26).unwrap();
        let b = alloc.request_block(24).unwrap();
        let c = alloc.request_block(26).unwrap();
        assert_eq!(a.network(), Ipv4Addr::new(10, 0, 0, 0));
        // the /24 is aligned up past the first /26
        assert_eq!(b.network(), Ipv4Addr::new(10, 0, 1, 0));
        assert_eq!(c.network(), Ipv4Addr::new(10, 0, 2, 0));
        assert!(u32::from(c.network()) >= u32::from(b.network()) + b.size());
    }

    #[test]
    fn assign_skips_network_and_stops_before_broadcast() {
        let mut alloc = AddressAllocator::from_cidr("192.168.0.0/24").unwrap();
        let mut block = alloc.request_block(30).unwrap();
        assert_eq!(block.assign().unwrap(), Ipv4Addr::new(192, 168, 0, 1));
        assert_eq!(block.assign().unwrap(), Ipv4Addr::new(192, 168, 0, 2));
        assert!(matches!(
            block.assign(),
            Err(AddrError::BlockExhausted { .. })
        ));
    }

    #[test]
    fn bad_cidr_strings_are_rejected() {
        assert!(AddressAllocator::from_cidr("10.0.0.0").is_err());
        assert!(AddressAllocator::from_cidr("10.0.0/8").is_err());
        assert!(AddressAllocator::from_cidr("10.0.0.0/33").is_err());
    }

    #[test]
    fn oversized_requests_are_invalid() {
        let mut alloc = AddressAllocator::from_cidr("10.0.0.0/24").unwrap();
        assert!(matches!(
            alloc.request_block(16),
            Err(AddrError::InvalidPrefix(16, 24))
        ));
    }

    fn small_topo() -> Topology {
        let link = LinkSpec::new(5.mbps(), 10_000_000, QueueDiscipline::DropTail);
        let spec = TopoSpec {
            clusters: vec![ClusterSpec::uniform(2, 2), ClusterSpec::uniform(2, 2)],
            ncores: 2,
            segment: link,
            access: link,
            bottleneck: link,
        };
        TopologyBuilder::new(spec).build().unwrap()
    }

    #[test]
    fn plan_covers_every_interface_exactly_once() {
        let topo = small_topo();
        let mut alloc = AddressAllocator::from_cidr("10.0.0.0/8").unwrap();
        let plan = assign_addresses(&topo, &mut alloc).unwrap();

        // one block per segment: 4 spokes + 2 access + core
        assert_eq!(plan.blocks().len(), 7);

        let mut seen = std::collections::HashSet::new();
        for (seg, members) in topo.segments() {
            for &ix in members {
                let addr = plan.address_of(ix, *seg).unwrap();
                assert!(seen.insert(addr), "address {} assigned twice", addr);
                let (_, block) = plan
                    .blocks()
                    .iter()
                    .find(|(s, _)| s == seg)
                    .unwrap();
                assert!(block.contains(addr));
            }
        }

        // a leaf's primary address lives in its spoke block
        let leaf = topo.index().leaf(0, 1, 0).unwrap();
        let spoke_seg = Segment::Spoke { cluster: 0, spoke: 1 };
        assert_eq!(
            plan.primary_address(leaf),
            plan.address_of(leaf, spoke_seg)
        );
    }
}
