//! Process groups and their node hierarchy.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use crate::coll::CollectiveSet;
use crate::config::ScanConfig;
use crate::datatype::Element;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::iscan;
use crate::op::Operator;
use crate::persistent::PersistentScan;
use crate::request::Request;
use crate::schedule::{Peer, Tag};
use crate::scratch::ScratchPool;
use crate::topology::NodeMap;

/// Identifier scoping message matching to one group.
///
/// Sub-communicators derive their context from the parent so that traffic on
/// the node group, the representatives group and the parent never mixes.
/// A derived node group uses `4 * ctx + 1` and a derived roots group
/// `4 * ctx + 2`. Contexts picked by hand for
/// [`with_subgroups`](Communicator::with_subgroups) should be multiples of
/// four (or `4 * ctx + 3`) so they stay clear of every derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u32);

impl ContextId {
    /// Context of the world group.
    pub const WORLD: ContextId = ContextId(0);

    fn node(self) -> Self {
        ContextId(self.0.wrapping_mul(4).wrapping_add(1))
    }

    fn roots(self) -> Self {
        ContextId(self.0.wrapping_mul(4).wrapping_add(2))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// A process group as seen from one of its members.
///
/// A communicator knows its own rank, the size of the group, which fabric
/// process each rank maps to, and optionally how the group is spread over
/// nodes. With a node map it also carries two sub-communicators:
///
/// - `node`: the ranks sharing this rank's node, absent when the node has a
///   single member;
/// - `roots`: one representative (the lowest rank) per node, present only on
///   representatives.
///
/// Every communicator carries a [`CollectiveSet`] that builds its scan and
/// broadcast schedules, so sub-communicators can use their own strategy.
///
/// Tags are handed out per communicator; all members must start collectives
/// in the same order.
///
/// # Example
///
/// ```
/// use ferroscan::{Communicator, ContextId, NodeMap};
///
/// let nodes = NodeMap::uniform(2, 2).unwrap();
/// let comm = Communicator::with_nodes(ContextId::WORLD, 3, (0..4).collect(), nodes).unwrap();
/// assert_eq!(comm.rank(), 3);
/// assert_eq!(comm.node().unwrap().rank(), 1);
/// assert!(comm.roots().is_none());
/// ```
pub struct Communicator {
    context: ContextId,
    rank: usize,
    processes: Arc<[usize]>,
    nodes: Option<Arc<NodeMap>>,
    node: Option<Box<Communicator>>,
    roots: Option<Box<Communicator>>,
    collectives: CollectiveSet,
    config: Arc<ScanConfig>,
    pool: ScratchPool,
    next_tag: Cell<Tag>,
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("context", &self.context)
            .field("rank", &self.rank)
            .field("size", &self.size())
            .field("node", &self.node.as_ref().map(|c| c.size()))
            .field("roots", &self.roots.as_ref().map(|c| c.size()))
            .field("collectives", &self.collectives)
            .finish()
    }
}

impl Communicator {
    /// A flat group: `processes[r]` is the fabric process of rank `r`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRank`] if `rank` is outside the group.
    pub fn new(context: ContextId, rank: usize, processes: Vec<usize>) -> Result<Self> {
        Self::build(context, rank, processes.into(), Arc::new(ScanConfig::default()))
    }

    fn build(
        context: ContextId,
        rank: usize,
        processes: Arc<[usize]>,
        config: Arc<ScanConfig>,
    ) -> Result<Self> {
        Error::check_rank(rank, processes.len())?;
        Ok(Communicator {
            context,
            rank,
            processes,
            nodes: None,
            node: None,
            roots: None,
            collectives: CollectiveSet::default(),
            pool: config.scratch_pool(),
            config,
            next_tag: Cell::new(0),
        })
    }

    /// A group spread over nodes, with its node and representatives
    /// sub-communicators derived from `nodes`.
    ///
    /// The sub-communicators are built even when the layout is not
    /// node-consecutive; the scan dispatch checks that property and falls back
    /// to the flat algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopology`] if the node map does not cover the group.
    pub fn with_nodes(
        context: ContextId,
        rank: usize,
        processes: Vec<usize>,
        nodes: NodeMap,
    ) -> Result<Self> {
        let mut comm = Self::new(context, rank, processes)?;
        comm.attach_nodes(nodes)?;
        Ok(comm)
    }

    fn attach_nodes(&mut self, nodes: NodeMap) -> Result<()> {
        if nodes.len() != self.size() {
            return Err(Error::InvalidTopology(format!(
                "node map covers {} ranks, group has {}",
                nodes.len(),
                self.size()
            )));
        }

        let members = nodes.members(self.rank)?;
        self.node = if members.len() > 1 {
            let local_rank = members
                .iter()
                .position(|&r| r == self.rank)
                .ok_or_else(|| Error::Internal("rank missing from its own node".into()))?;
            Some(Box::new(self.subgroup(self.context.node(), local_rank, &members)?))
        } else {
            None
        };

        self.roots = if nodes.is_representative(self.rank)? {
            let leaders = nodes.representatives();
            let node_index = nodes.node_index(self.rank)?;
            Some(Box::new(self.subgroup(self.context.roots(), node_index, &leaders)?))
        } else {
            None
        };

        self.nodes = Some(Arc::new(nodes));
        Ok(())
    }

    fn subgroup(&self, context: ContextId, rank: usize, ranks: &[usize]) -> Result<Self> {
        let processes = ranks
            .iter()
            .map(|&r| self.process_of(r))
            .collect::<Result<Vec<_>>>()?;
        let mut sub = Self::build(context, rank, processes.into(), Arc::clone(&self.config))?;
        sub.pool = self.pool.clone();
        Ok(sub)
    }

    /// Replace the derived sub-communicators with caller-built ones, for
    /// example to give them their own [`CollectiveSet`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopology`] if the group has no node map or a
    /// sub-communicator does not match it: wrong membership, wrong rank, a
    /// representatives group on a non-representative, or a missing one on a
    /// representative. Both sub-groups must also have contexts distinct from
    /// the parent's and from each other.
    pub fn with_subgroups(
        mut self,
        node: Option<Communicator>,
        roots: Option<Communicator>,
    ) -> Result<Self> {
        let nodes = self
            .nodes
            .clone()
            .ok_or_else(|| Error::InvalidTopology("group has no node map".into()))?;

        let members = nodes.members(self.rank)?;
        let node = match node {
            Some(sub) if sub.size() == 1 && members.len() == 1 => None,
            other => other,
        };
        match (&node, members.len()) {
            (None, 1) => {}
            (Some(sub), _) => self.check_subgroup("node", sub, &members, self.rank)?,
            (None, n) => {
                return Err(Error::InvalidTopology(format!(
                    "node of rank {} has {n} members but no node group was given",
                    self.rank
                )))
            }
        }

        let leaders = nodes.representatives();
        match (&roots, nodes.is_representative(self.rank)?) {
            (None, false) => {}
            (Some(sub), true) => self.check_subgroup("roots", sub, &leaders, self.rank)?,
            (Some(_), false) => {
                return Err(Error::InvalidTopology(format!(
                    "rank {} is not a node representative but was given a roots group",
                    self.rank
                )))
            }
            (None, true) => {
                return Err(Error::InvalidTopology(format!(
                    "representative rank {} needs a roots group",
                    self.rank
                )))
            }
        }

        if let (Some(node), Some(roots)) = (&node, &roots) {
            if node.context == roots.context {
                return Err(Error::InvalidTopology(format!(
                    "node and roots groups share context {}",
                    node.context
                )));
            }
        }

        self.node = node.map(Box::new);
        self.roots = roots.map(Box::new);
        Ok(self)
    }

    fn check_subgroup(
        &self,
        what: &str,
        sub: &Communicator,
        ranks: &[usize],
        me: usize,
    ) -> Result<()> {
        let expected = ranks
            .iter()
            .map(|&r| self.process_of(r))
            .collect::<Result<Vec<_>>>()?;
        if sub.processes[..] != expected[..] {
            return Err(Error::InvalidTopology(format!(
                "{what} group members {:?} do not match expected {expected:?}",
                &sub.processes[..]
            )));
        }
        if ranks.get(sub.rank) != Some(&me) {
            return Err(Error::InvalidTopology(format!(
                "{what} group places rank {me} at position {}",
                sub.rank
            )));
        }
        if sub.context == self.context {
            return Err(Error::InvalidTopology(format!(
                "{what} group shares context {} with its parent",
                self.context
            )));
        }
        Ok(())
    }

    /// Use `collectives` to build this group's schedules.
    pub fn with_collectives(mut self, collectives: CollectiveSet) -> Self {
        self.collectives = collectives;
        self
    }

    /// Apply `config` to this communicator and its sub-communicators.
    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.set_config(Arc::new(config));
        self
    }

    fn set_config(&mut self, config: Arc<ScanConfig>) {
        self.pool = config.scratch_pool();
        for sub in [&mut self.node, &mut self.roots].into_iter().flatten() {
            sub.set_config(Arc::clone(&config));
            sub.pool = self.pool.clone();
        }
        self.config = config;
    }

    /// Draw scratch from `pool`, here and in the sub-communicators.
    pub fn with_pool(mut self, pool: ScratchPool) -> Self {
        for sub in [&mut self.node, &mut self.roots].into_iter().flatten() {
            sub.pool = pool.clone();
        }
        self.pool = pool;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Get the rank of the calling process in this group.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Get the number of processes in this group.
    pub fn size(&self) -> usize {
        self.processes.len()
    }

    /// Context scoping this group's messages.
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Fabric process of `rank`.
    pub fn process_of(&self, rank: usize) -> Result<usize> {
        self.processes
            .get(rank)
            .copied()
            .ok_or(Error::InvalidRank(rank))
    }

    /// Address of `rank` for a send or receive step.
    pub fn peer(&self, rank: usize) -> Result<Peer> {
        Ok(Peer {
            context: self.context,
            rank,
            process: self.process_of(rank)?,
        })
    }

    /// Node layout, if known.
    pub fn nodes(&self) -> Option<&NodeMap> {
        self.nodes.as_deref()
    }

    /// Whether the group has a node map and it is node-consecutive.
    pub fn is_node_consecutive(&self) -> bool {
        self.nodes().is_some_and(NodeMap::is_node_consecutive)
    }

    /// Index of this rank's node among all nodes (rank in the representatives
    /// group for representatives).
    pub fn node_index(&self) -> Option<usize> {
        self.nodes().and_then(|n| n.node_index(self.rank).ok())
    }

    /// Ranks sharing this rank's node, if the node has more than one member.
    pub fn node(&self) -> Option<&Communicator> {
        self.node.as_deref()
    }

    /// One rank per node, present on representatives only.
    pub fn roots(&self) -> Option<&Communicator> {
        self.roots.as_deref()
    }

    /// Schedule builders for this group.
    pub fn collectives(&self) -> &CollectiveSet {
        &self.collectives
    }

    /// Tunables.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scratch pool used for schedules started on this group.
    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }

    /// Allocate the tag for the next collective on this group.
    pub fn next_tag(&self) -> Tag {
        let tag = self.next_tag.get();
        self.next_tag.set(tag.wrapping_add(1));
        tag
    }

    // ========================================================================
    // Scan
    // ========================================================================

    /// Nonblocking inclusive scan.
    ///
    /// `recv` only provides the output storage; it must have the same length
    /// as `send`. The result comes back from [`Request::wait`].
    pub fn iscan<T, E>(
        &self,
        engine: &E,
        send: &[T],
        recv: Vec<T>,
        op: &Operator<T>,
    ) -> Result<Request<T>>
    where
        T: Element,
        E: Engine<T>,
    {
        iscan::start(engine, self, Some(send.to_vec()), recv, op)
    }

    /// Nonblocking inclusive scan whose contribution already sits in `data`.
    pub fn iscan_in_place<T, E>(&self, engine: &E, data: Vec<T>, op: &Operator<T>) -> Result<Request<T>>
    where
        T: Element,
        E: Engine<T>,
    {
        iscan::start(engine, self, None, data, op)
    }

    /// Blocking inclusive scan.
    pub fn scan<T, E>(&self, engine: &E, send: &[T], op: &Operator<T>) -> Result<Vec<T>>
    where
        T: Element,
        E: Engine<T>,
    {
        self.iscan_in_place(engine, send.to_vec(), op)?.wait()
    }

    /// Blocking inclusive scan of a single value.
    pub fn scan_scalar<T, E>(&self, engine: &E, value: T, op: &Operator<T>) -> Result<T>
    where
        T: Element,
        E: Engine<T>,
    {
        self.scan(engine, std::slice::from_ref(&value), op)?
            .pop()
            .ok_or_else(|| Error::Internal("scan returned no element".into()))
    }

    /// Build a scan schedule once for repeated use.
    ///
    /// `count` is the number of elements every later start must provide.
    pub fn scan_init<T: Element>(&self, count: usize, op: &Operator<T>) -> Result<PersistentScan<T>> {
        PersistentScan::init(self, count, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world(rank: usize, sizes: &[usize]) -> Communicator {
        let nodes = NodeMap::blocks(sizes).unwrap();
        Communicator::with_nodes(ContextId::WORLD, rank, (0..nodes.len()).collect(), nodes).unwrap()
    }

    #[test]
    fn flat_group_has_no_subgroups() {
        let comm = Communicator::new(ContextId::WORLD, 1, vec![10, 11, 12]).unwrap();
        assert_eq!(comm.size(), 3);
        assert_eq!(comm.process_of(2).unwrap(), 12);
        assert!(comm.node().is_none());
        assert!(comm.roots().is_none());
        assert!(!comm.is_node_consecutive());
        assert_eq!(comm.node_index(), None);
    }

    #[test]
    fn rank_outside_group_is_rejected() {
        let err = Communicator::new(ContextId::WORLD, 3, vec![0, 1, 2]).unwrap_err();
        assert_eq!(err, Error::InvalidRank(3));
    }

    #[test]
    fn representative_sees_both_subgroups() {
        let comm = world(2, &[2, 3]);
        let node = comm.node().unwrap();
        let roots = comm.roots().unwrap();
        assert_eq!((node.rank(), node.size()), (0, 3));
        assert_eq!((roots.rank(), roots.size()), (1, 2));
        assert_eq!(roots.process_of(0).unwrap(), 0);
        assert_eq!(roots.process_of(1).unwrap(), 2);
        assert_ne!(node.context(), roots.context());
        assert_ne!(node.context(), comm.context());
    }

    #[test]
    fn singleton_node_has_no_node_group() {
        let comm = world(0, &[1, 2]);
        assert!(comm.node().is_none());
        assert!(comm.roots().is_some());
        let last = world(2, &[1, 2]);
        assert_eq!(last.node().unwrap().rank(), 1);
        assert!(last.roots().is_none());
        assert_eq!(last.node_index(), Some(1));
    }

    #[test]
    fn node_map_must_cover_group() {
        let nodes = NodeMap::uniform(2, 2).unwrap();
        let err = Communicator::with_nodes(ContextId::WORLD, 0, vec![0, 1, 2], nodes).unwrap_err();
        assert!(matches!(err, Error::InvalidTopology(_)));
    }

    #[test]
    fn tags_increase() {
        let comm = world(0, &[2]);
        assert_eq!(comm.next_tag(), 0);
        assert_eq!(comm.next_tag(), 1);
        assert_eq!(comm.node().unwrap().next_tag(), 0);
    }

    #[test]
    fn custom_subgroups_are_validated() {
        let base = world(1, &[2, 2]);
        // rank 1 is not a representative
        let bogus_roots =
            Communicator::new(ContextId(99), 0, vec![0, 2]).unwrap();
        let node = Communicator::new(ContextId(98), 1, vec![0, 1]).unwrap();
        let err = base
            .with_subgroups(Some(node), Some(bogus_roots))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTopology(_)));

        let base = world(2, &[2, 2]);
        let wrong_members = Communicator::new(ContextId(98), 0, vec![2, 1]).unwrap();
        let roots = Communicator::new(ContextId(99), 1, vec![0, 2]).unwrap();
        assert!(base.with_subgroups(Some(wrong_members), Some(roots)).is_err());

        let base = world(2, &[2, 2]);
        let node = Communicator::new(ContextId(98), 0, vec![2, 3]).unwrap();
        let roots = Communicator::new(ContextId(99), 1, vec![0, 2]).unwrap();
        let comm = base.with_subgroups(Some(node), Some(roots)).unwrap();
        assert_eq!(comm.roots().unwrap().context(), ContextId(99));
    }

    #[test]
    fn node_and_roots_need_distinct_contexts() {
        let base = world(0, &[2, 2]);
        let node = Communicator::new(ContextId(96), 0, vec![0, 1]).unwrap();
        let roots = Communicator::new(ContextId(96), 0, vec![0, 2]).unwrap();
        let err = base.with_subgroups(Some(node), Some(roots)).unwrap_err();
        assert!(err.to_string().contains("share context ctx96"));

        // a non-representative carries no roots group, so nothing can collide
        let base = world(1, &[2, 2]);
        let node = Communicator::new(ContextId(96), 1, vec![0, 1]).unwrap();
        assert!(base.with_subgroups(Some(node), None).is_ok());
    }

    #[test]
    fn derived_contexts_are_distinct() {
        let comm = world(0, &[2, 2]);
        let node = comm.node().unwrap().context();
        let roots = comm.roots().unwrap().context();
        assert_ne!(node, roots);
        assert_ne!(node, comm.context());
        assert_ne!(roots, comm.context());
        assert_eq!(node.0 % 4, 1);
        assert_eq!(roots.0 % 4, 2);
    }

    #[test]
    fn representative_without_roots_fails_fast() {
        let base = world(0, &[2, 2]);
        let node = Communicator::new(ContextId(98), 0, vec![0, 1]).unwrap();
        let err = base.with_subgroups(Some(node), None).unwrap_err();
        assert!(err.to_string().contains("needs a roots group"));
    }

    #[test]
    fn config_propagates_to_subgroups() {
        let comm = world(0, &[2, 2]).with_config(ScanConfig {
            scratch_limit: Some(64),
            ..ScanConfig::default()
        });
        assert_eq!(comm.node().unwrap().config().scratch_limit, Some(64));
        assert_eq!(comm.roots().unwrap().config().scratch_limit, Some(64));
    }
}
