//! Node layout of a process group.
//!
//! A [`NodeMap`] records, for every rank of a group, which node (shared-memory
//! host) it runs on. The hierarchical scan needs the layout to be
//! *node-consecutive*: the ranks of each node form one contiguous interval.

use crate::error::{Error, Result};

/// Node label of every rank in a group.
///
/// Labels are arbitrary; nodes are ordered by their lowest rank, and that
/// lowest rank is the node's representative.
///
/// # Example
///
/// ```
/// use ferroscan::NodeMap;
///
/// let blocks = NodeMap::blocks(&[2, 3]).unwrap();
/// assert!(blocks.is_node_consecutive());
/// assert_eq!(blocks.representatives(), vec![0, 2]);
///
/// let striped = NodeMap::round_robin(4, 2).unwrap();
/// assert!(!striped.is_node_consecutive());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMap {
    node_of: Vec<usize>,
}

impl NodeMap {
    /// Build a map from the node label of each rank.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopology`] if `node_of` is empty.
    pub fn new(node_of: Vec<usize>) -> Result<Self> {
        if node_of.is_empty() {
            return Err(Error::InvalidTopology("node map of an empty group".into()));
        }
        Ok(NodeMap { node_of })
    }

    /// Consecutive nodes with the given number of ranks each.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTopology`] if there are no nodes or a node is empty.
    pub fn blocks(sizes: &[usize]) -> Result<Self> {
        if sizes.contains(&0) {
            return Err(Error::InvalidTopology(format!(
                "node sizes must be positive, got {sizes:?}"
            )));
        }
        let node_of = sizes
            .iter()
            .enumerate()
            .flat_map(|(node, &n)| std::iter::repeat(node).take(n))
            .collect();
        Self::new(node_of)
    }

    /// `nodes` consecutive nodes of `per_node` ranks each.
    pub fn uniform(nodes: usize, per_node: usize) -> Result<Self> {
        Self::blocks(&vec![per_node; nodes])
    }

    /// Ranks dealt to `nodes` nodes in turn. Not node-consecutive when
    /// `nodes > 1` and `size > nodes`.
    pub fn round_robin(size: usize, nodes: usize) -> Result<Self> {
        if nodes == 0 {
            return Err(Error::InvalidTopology("round-robin over zero nodes".into()));
        }
        Self::new((0..size).map(|r| r % nodes).collect())
    }

    /// Number of ranks covered.
    pub fn len(&self) -> usize {
        self.node_of.len()
    }

    /// Always false; an empty map cannot be built.
    pub fn is_empty(&self) -> bool {
        self.node_of.is_empty()
    }

    /// Node label of `rank`.
    pub fn node_of(&self, rank: usize) -> Result<usize> {
        self.node_of
            .get(rank)
            .copied()
            .ok_or(Error::InvalidRank(rank))
    }

    /// Whether every node's ranks form one contiguous interval.
    pub fn is_node_consecutive(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        let mut prev = None;
        for &node in &self.node_of {
            if prev != Some(node) {
                if !seen.insert(node) {
                    return false;
                }
                prev = Some(node);
            }
        }
        true
    }

    /// Ranks sharing a node with `rank`, ascending.
    pub fn members(&self, rank: usize) -> Result<Vec<usize>> {
        let node = self.node_of(rank)?;
        Ok(self
            .node_of
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n == node)
            .map(|(r, _)| r)
            .collect())
    }

    /// Lowest rank of each node, ascending. Position in this list is the
    /// node's index.
    pub fn representatives(&self) -> Vec<usize> {
        let mut seen = std::collections::HashSet::new();
        self.node_of
            .iter()
            .enumerate()
            .filter(|&(_, &n)| seen.insert(n))
            .map(|(r, _)| r)
            .collect()
    }

    /// Number of distinct nodes.
    pub fn num_nodes(&self) -> usize {
        self.representatives().len()
    }

    /// Index of the node `rank` runs on, counting nodes by their lowest rank.
    pub fn node_index(&self, rank: usize) -> Result<usize> {
        let node = self.node_of(rank)?;
        let leaders = self.representatives();
        leaders
            .iter()
            .position(|&leader| self.node_of[leader] == node)
            .ok_or_else(|| Error::Internal(format!("node {node} has no representative")))
    }

    /// Whether `rank` is its node's representative.
    pub fn is_representative(&self, rank: usize) -> Result<bool> {
        let node = self.node_of(rank)?;
        Ok(self.node_of.iter().position(|&n| n == node) == Some(rank))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_layout() {
        let map = NodeMap::blocks(&[1, 3, 2]).unwrap();
        assert_eq!(map.len(), 6);
        assert_eq!(map.num_nodes(), 3);
        assert_eq!(map.representatives(), vec![0, 1, 4]);
        assert_eq!(map.members(2).unwrap(), vec![1, 2, 3]);
        assert_eq!(map.node_index(5).unwrap(), 2);
        assert!(map.is_representative(4).unwrap());
        assert!(!map.is_representative(5).unwrap());
    }

    #[test]
    fn empty_node_rejected() {
        assert!(NodeMap::blocks(&[2, 0]).is_err());
        assert!(NodeMap::blocks(&[]).is_err());
        assert!(NodeMap::round_robin(4, 0).is_err());
    }

    #[test]
    fn consecutive_detection() {
        assert!(NodeMap::new(vec![7, 7, 3, 3, 3]).unwrap().is_node_consecutive());
        assert!(!NodeMap::new(vec![0, 1, 0]).unwrap().is_node_consecutive());
        assert!(NodeMap::round_robin(2, 2).unwrap().is_node_consecutive());
        assert!(!NodeMap::round_robin(6, 3).unwrap().is_node_consecutive());
    }

    #[test]
    fn interleaved_nodes_are_indexed_by_lowest_rank() {
        let map = NodeMap::round_robin(6, 3).unwrap();
        assert_eq!(map.representatives(), vec![0, 1, 2]);
        assert_eq!(map.members(4).unwrap(), vec![1, 4]);
        assert_eq!(map.node_index(5).unwrap(), 2);
    }

    #[test]
    fn out_of_range_rank() {
        let map = NodeMap::uniform(2, 2).unwrap();
        assert_eq!(map.node_of(4), Err(Error::InvalidRank(4)));
    }
}
