//! Quorum linearizer.
//!
//! Holds the unconfirmed part of the causal DAG and extracts from it the
//! longest prefix a majority of the current indexers has observed.
//!
//! Co-appended groups are the unit of ordering. The final order is a
//! topological sort where, among groups whose dependencies are already
//! ordered, the one with the lowest `(rank, first node id)` goes next (see
//! [`quorum`] for ranks). A group is confirmed only when it is provably that
//! lowest one: its rank bracket lies below anything a not-yet-merged node
//! could reach and no other ready group could still undercut it. Every
//! replica that confirms a group therefore confirms it at the same
//! position.
//!
//! # Examples
//!
//! ```
//! use concord_core::keys::WriterKey;
//! use concord_core::models::Node;
//! use concord_dag::Linearizer;
//!
//! let a = WriterKey::from_bytes([1; 32]);
//! let mut lin = Linearizer::new(a, vec![a], vec![], 0);
//! lin.add_writer(a, 0, 0);
//! let height = lin.next_height(&a, &[]);
//! lin.add_head(Node {
//!     writer: a,
//!     seq: 0,
//!     batch: 1,
//!     heads: vec![],
//!     value: Some(b"x".to_vec()),
//!     height,
//!     version: 1,
//! })
//! .unwrap();
//! let batch = lin.update().unwrap();
//! assert_eq!(batch.nodes.len(), 1);
//! assert_eq!(lin.indexed_length(), 1);
//! ```

mod clock;
pub mod quorum;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use concord_core::errors::{BaseError, BaseResult};
use concord_core::keys::WriterKey;
use concord_core::models::{Node, NodeId};

pub use clock::Clock;
use quorum::{unseen_floor, RankBounds};

/// Nodes confirmed by one [`Linearizer::update`] call, in final order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearizedBatch {
    /// Indexed length before this batch.
    pub start: u64,
    pub nodes: Vec<Node>,
}

impl LinearizedBatch {
    /// Indexed length after this batch.
    pub fn end(&self) -> u64 {
        self.start + self.nodes.len() as u64
    }

    /// Splits the batch into co-appended groups.
    pub fn groups(&self) -> Vec<&[Node]> {
        let mut groups = Vec::new();
        let mut begin = 0;
        for (i, node) in self.nodes.iter().enumerate() {
            if node.ends_group() {
                groups.push(&self.nodes[begin..=i]);
                begin = i + 1;
            }
        }
        if begin < self.nodes.len() {
            groups.push(&self.nodes[begin..]);
        }
        groups
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Chain {
    /// Nodes confirmed.
    confirmed: u64,
    /// Nodes confirmed or merged into the arena.
    merged: u64,
    /// Height of the latest merged node, 0 before the first.
    height: u64,
}

#[derive(Debug)]
struct Entry {
    node: Node,
    clock: Clock,
}

/// An unconfirmed group, identified by its first and last node.
#[derive(Debug, Clone, Copy)]
struct Group {
    first: NodeId,
    end: NodeId,
}

/// Sort key of a ready group: lowest candidate first.
type ReadyKey = (u64, NodeId, NodeId);

#[derive(Debug)]
pub struct Linearizer {
    bootstrap: WriterKey,
    indexers: Vec<WriterKey>,
    majority: usize,
    chains: BTreeMap<WriterKey, Chain>,
    arena: HashMap<NodeId, Entry>,
    frontier: BTreeSet<NodeId>,
    indexed_length: u64,
}

impl Linearizer {
    /// A linearizer resuming after `indexed_length` confirmed nodes whose
    /// frontier is `heads`. An empty indexer set falls back to the bootstrap.
    pub fn new(
        bootstrap: WriterKey,
        indexers: Vec<WriterKey>,
        heads: Vec<NodeId>,
        indexed_length: u64,
    ) -> Self {
        let mut indexers = if indexers.is_empty() {
            vec![bootstrap]
        } else {
            indexers
        };
        indexers.sort();
        indexers.dedup();
        let majority = indexers.len() / 2 + 1;
        Self {
            bootstrap,
            indexers,
            majority,
            chains: BTreeMap::new(),
            arena: HashMap::new(),
            frontier: heads.into_iter().collect(),
            indexed_length,
        }
    }

    pub fn indexers(&self) -> &[WriterKey] {
        &self.indexers
    }

    pub fn majority(&self) -> usize {
        self.majority
    }

    pub fn indexed_length(&self) -> u64 {
        self.indexed_length
    }

    /// Trust root while no indexer set has been confirmed.
    pub fn bootstrap_writers(&self) -> Vec<WriterKey> {
        vec![self.bootstrap]
    }

    /// Starts tracking `key`, whose first `confirmed` nodes are linearized
    /// and whose last linearized node has height `height`.
    pub fn add_writer(&mut self, key: WriterKey, confirmed: u64, height: u64) {
        self.chains.entry(key).or_insert(Chain {
            confirmed,
            merged: confirmed,
            height,
        });
    }

    pub fn has_writer(&self, key: &WriterKey) -> bool {
        self.chains.contains_key(key)
    }

    /// Stops tracking `key`. Refused while it has unconfirmed nodes.
    pub fn remove_writer(&mut self, key: &WriterKey) -> bool {
        match self.chains.get(key) {
            Some(chain) if chain.merged == chain.confirmed => {
                self.chains.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Merged length of `key` (confirmed plus unconfirmed nodes).
    pub fn merged_length(&self, key: &WriterKey) -> u64 {
        self.chains.get(key).map_or(0, |c| c.merged)
    }

    /// Height of `key`'s latest merged node.
    pub fn writer_height(&self, key: &WriterKey) -> u64 {
        self.chains.get(key).map_or(0, |c| c.height)
    }

    /// Whether `id` is confirmed or merged.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.chains.get(&id.writer).is_some_and(|c| id.seq < c.merged)
    }

    pub fn is_confirmed(&self, id: &NodeId) -> bool {
        self.chains.get(&id.writer).is_some_and(|c| id.seq < c.confirmed)
    }

    fn height_of(&self, id: &NodeId) -> u64 {
        match self.arena.get(id) {
            Some(entry) => entry.node.height,
            // Confirmed: never above its writer's latest node.
            None => self.writer_height(&id.writer),
        }
    }

    /// Height for the next node `writer` appends on top of `heads`.
    pub fn next_height(&self, writer: &WriterKey, heads: &[NodeId]) -> u64 {
        heads
            .iter()
            .map(|h| self.height_of(h))
            .chain(std::iter::once(self.writer_height(writer)))
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Inserts `node` into the frontier, dropping every frontier node it
    /// covers. The node's writer must be tracked, the node must be the
    /// next one of its writer, and all its heads must be present.
    pub fn add_head(&mut self, node: Node) -> BaseResult<()> {
        let id = node.id();
        let chain = self.chains.get(&id.writer).copied().ok_or_else(|| BaseError::Decode {
            details: format!("node {}:{} from untracked writer", id.writer.short(), id.seq),
        })?;
        if id.seq != chain.merged {
            return Err(BaseError::Decode {
                details: format!(
                    "node {}:{} out of order, expected seq {}",
                    id.writer.short(),
                    id.seq,
                    chain.merged
                ),
            });
        }
        if let Some(missing) = node.heads.iter().find(|h| !self.contains(h)) {
            return Err(BaseError::Decode {
                details: format!(
                    "node {}:{} depends on missing {}:{}",
                    id.writer.short(),
                    id.seq,
                    missing.writer.short(),
                    missing.seq
                ),
            });
        }
        let floor = node
            .heads
            .iter()
            .filter_map(|h| self.arena.get(h).map(|e| e.node.height))
            .chain(std::iter::once(chain.height))
            .max()
            .unwrap_or(0);
        if node.height <= floor {
            return Err(BaseError::Decode {
                details: format!(
                    "node {}:{} has height {} not above its dependencies ({floor})",
                    id.writer.short(),
                    id.seq,
                    node.height
                ),
            });
        }

        let mut clock = Clock::default();
        for dep in node.heads.iter().copied().chain(id.prev()) {
            if let Some(entry) = self.arena.get(&dep) {
                clock.merge(&entry.clock);
            }
        }
        clock.include(&id);

        for head in &node.heads {
            self.frontier.remove(head);
        }
        if let Some(prev) = id.prev() {
            self.frontier.remove(&prev);
        }
        self.frontier.insert(id);

        if let Some(chain) = self.chains.get_mut(&id.writer) {
            chain.merged += 1;
            chain.height = node.height;
        }
        self.arena.insert(id, Entry { node, clock });
        Ok(())
    }

    /// Current frontier, ordered by writer key then seq.
    pub fn get_heads(&self) -> Vec<NodeId> {
        self.frontier.iter().copied().collect()
    }

    /// Unconfirmed nodes held.
    pub fn unconfirmed(&self) -> usize {
        self.arena.len()
    }

    /// Unconfirmed nodes carrying a value.
    pub fn unconfirmed_values(&self) -> usize {
        self.arena.values().filter(|e| !e.node.is_ack()).count()
    }

    /// Whether `writer` should append an empty node so quorum can progress.
    ///
    /// True when `writer` is an indexer and its latest node does not observe
    /// some unconfirmed frontier node, and either `force` is set or some
    /// unconfirmed node carries a value.
    pub fn should_ack(&self, writer: &WriterKey, force: bool) -> bool {
        if self.indexers.binary_search(writer).is_err() {
            return false;
        }
        let latest = self
            .chains
            .get(writer)
            .and_then(|c| c.merged.checked_sub(1))
            .and_then(|seq| self.arena.get(&NodeId::new(*writer, seq)));

        let lagging = self
            .frontier
            .iter()
            .filter(|id| self.arena.contains_key(*id))
            .any(|id| latest.map_or(true, |entry| !entry.clock.observes(id)));

        lagging && (force || self.unconfirmed_values() > 0)
    }

    /// Height of the first merged node of `indexer` that observes `target`.
    fn first_observer(&self, indexer: &WriterKey, target: &NodeId) -> Option<u64> {
        let chain = self.chains.get(indexer)?;
        let (mut lo, mut hi) = (chain.confirmed, chain.merged);
        let entry = |seq: u64| self.arena.get(&NodeId::new(*indexer, seq));
        let observes = |seq: u64| entry(seq).is_some_and(|e| e.clock.observes(target));
        if lo == hi || !observes(hi - 1) {
            return None;
        }
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if observes(mid) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        entry(lo).map(|e| e.node.height)
    }

    fn rank_bounds(&self, group: &Group) -> RankBounds {
        let height = self.height_of(&group.end);
        let (observed, unseen): (Vec<Option<u64>>, Vec<u64>) = self
            .indexers
            .iter()
            .map(|indexer| {
                (
                    self.first_observer(indexer, &group.end),
                    height.max(self.writer_height(indexer)) + 1,
                )
            })
            .unzip();
        RankBounds::compute(&observed, &unseen, self.majority)
    }

    /// Complete unconfirmed groups, keyed by every member node.
    fn collect_groups(&self) -> HashMap<NodeId, Group> {
        let mut owner = HashMap::new();
        for (writer, chain) in &self.chains {
            let mut members = Vec::new();
            for seq in chain.confirmed..chain.merged {
                let id = NodeId::new(*writer, seq);
                let Some(entry) = self.arena.get(&id) else {
                    break;
                };
                members.push(id);
                if entry.node.ends_group() {
                    let group = Group {
                        first: members[0],
                        end: id,
                    };
                    for member in members.drain(..) {
                        owner.insert(member, group);
                    }
                }
            }
        }
        owner
    }

    /// Confirms the next majority-observed batch. `None` when nothing new
    /// can be confirmed.
    pub fn update(&mut self) -> Option<LinearizedBatch> {
        if self.arena.is_empty() {
            return None;
        }
        let latest: Vec<u64> = self
            .indexers
            .iter()
            .map(|k| self.writer_height(k))
            .collect();
        let floor = unseen_floor(&latest, self.majority);

        let owner = self.collect_groups();
        let mut blocked: HashMap<NodeId, usize> = HashMap::new();
        let mut unblocks: HashMap<NodeId, Vec<Group>> = HashMap::new();
        let mut groups: Vec<Group> = owner.values().copied().collect();
        groups.sort_by_key(|g| g.end);
        groups.dedup_by_key(|g| g.end);

        let mut ready: BTreeSet<ReadyKey> = BTreeSet::new();
        let mut bounds: HashMap<NodeId, RankBounds> = HashMap::new();
        for group in &groups {
            let mut deps: Vec<NodeId> = Vec::new();
            let mut incomplete = false;
            for seq in group.first.seq..=group.end.seq {
                let Some(entry) = self.arena.get(&NodeId::new(group.end.writer, seq)) else {
                    continue;
                };
                for dep in entry.node.heads.iter().chain(group.first.prev().as_ref()) {
                    if !self.arena.contains_key(dep) {
                        continue;
                    }
                    match owner.get(dep) {
                        Some(g) if g.end != group.end => deps.push(g.end),
                        Some(_) => {}
                        None => incomplete = true,
                    }
                }
            }
            if incomplete {
                // Depends on a group still missing its tail.
                blocked.insert(group.end, usize::MAX);
                continue;
            }
            deps.sort();
            deps.dedup();
            if deps.is_empty() {
                let b = self.rank_bounds(group);
                bounds.insert(group.end, b);
                ready.insert((b.lower, group.first, group.end));
            } else {
                blocked.insert(group.end, deps.len());
                for dep in deps {
                    unblocks.entry(dep).or_default().push(*group);
                }
            }
        }

        let mut nodes: Vec<Node> = Vec::new();
        while let Some(&candidate) = ready.iter().next() {
            let (_, first, end) = candidate;
            let upper = bounds.get(&end).map_or(u64::MAX, |b| b.upper);
            if upper >= floor {
                break;
            }
            if let Some(&(lower, next_first, _)) = ready.iter().nth(1) {
                let after = lower > upper || (lower == upper && next_first > first);
                if !after {
                    break;
                }
            }
            ready.remove(&candidate);

            for seq in first.seq..=end.seq {
                if let Some(entry) = self.arena.remove(&NodeId::new(end.writer, seq)) {
                    nodes.push(entry.node);
                }
            }
            if let Some(chain) = self.chains.get_mut(&end.writer) {
                chain.confirmed = chain.confirmed.max(end.seq + 1);
            }
            for dependent in unblocks.remove(&end).unwrap_or_default() {
                let Some(count) = blocked.get_mut(&dependent.end) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count == 0 {
                    blocked.remove(&dependent.end);
                    let b = self.rank_bounds(&dependent);
                    bounds.insert(dependent.end, b);
                    ready.insert((b.lower, dependent.first, dependent.end));
                }
            }
        }
        if nodes.is_empty() {
            return None;
        }

        let batch = LinearizedBatch {
            start: self.indexed_length,
            nodes,
        };
        self.indexed_length = batch.end();
        tracing::debug!(
            start = batch.start,
            end = batch.end(),
            remaining = self.arena.len(),
            "linearized batch"
        );
        Some(batch)
    }
}
