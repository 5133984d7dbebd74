//! SLURM scheduler environment helpers.
//!
//! These functions read SLURM environment variables to recover the job's node
//! layout. They return `None` if the variable is not set (e.g., when not
//! running under SLURM).
//!
//! # Environment Variables
//!
//! | Function             | Variable               | Description                        |
//! |----------------------|------------------------|------------------------------------|
//! | `job_id()`           | `SLURM_JOB_ID`         | Unique job identifier              |
//! | `local_rank()`       | `SLURM_LOCALID`        | Task ID relative to this node      |
//! | `num_nodes()`        | `SLURM_NNODES`         | Total number of nodes              |
//! | `tasks_per_node()`   | `SLURM_TASKS_PER_NODE` | Tasks on each node, e.g. `4(x2),3` |
//!
//! SLURM's default block distribution places consecutive task ids on the same
//! node, which is exactly the node-consecutive layout the hierarchical scan
//! needs; [`node_map()`] turns the task counts into a [`NodeMap`].

use std::env;

use crate::error::{Error, Result};
use crate::topology::NodeMap;

/// Check if running under SLURM job scheduler.
pub fn is_slurm_job() -> bool {
    env::var("SLURM_JOB_ID").is_ok()
}

/// Get the SLURM job ID.
pub fn job_id() -> Option<String> {
    env::var("SLURM_JOB_ID").ok()
}

/// Get the local (intra-node) rank of this process.
pub fn local_rank() -> Option<usize> {
    env::var("SLURM_LOCALID").ok().and_then(|s| s.parse().ok())
}

/// Get the total number of nodes allocated.
pub fn num_nodes() -> Option<usize> {
    env::var("SLURM_NNODES").ok().and_then(|s| s.parse().ok())
}

/// Get the number of tasks on each node, in node order.
pub fn tasks_per_node() -> Option<Result<Vec<usize>>> {
    env::var("SLURM_TASKS_PER_NODE")
        .ok()
        .map(|s| parse_tasks_per_node(&s))
}

/// Node layout of the job under block distribution.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if `SLURM_TASKS_PER_NODE` is malformed, or
/// [`Error::InvalidTopology`] if it disagrees with `SLURM_NNODES`.
pub fn node_map() -> Result<Option<NodeMap>> {
    let Some(counts) = tasks_per_node().transpose()? else {
        return Ok(None);
    };
    if let Some(nodes) = num_nodes() {
        if nodes != counts.len() {
            return Err(Error::InvalidTopology(format!(
                "SLURM_NNODES is {nodes} but SLURM_TASKS_PER_NODE lists {} nodes",
                counts.len()
            )));
        }
    }
    NodeMap::blocks(&counts).map(Some)
}

/// Expand SLURM's compressed task list (`"4(x2),3"` is `[4, 4, 3]`).
pub fn parse_tasks_per_node(s: &str) -> Result<Vec<usize>> {
    let bad = || Error::InvalidConfig {
        key: "SLURM_TASKS_PER_NODE".into(),
        value: s.into(),
    };
    let mut counts = Vec::new();
    for entry in s.split(',') {
        let entry = entry.trim();
        let (tasks, repeat) = match entry.split_once('(') {
            Some((tasks, rest)) => {
                let repeat = rest
                    .strip_prefix('x')
                    .and_then(|r| r.strip_suffix(')'))
                    .and_then(|r| r.parse::<usize>().ok())
                    .ok_or_else(bad)?;
                (tasks, repeat)
            }
            None => (entry, 1),
        };
        let tasks: usize = tasks.parse().map_err(|_| bad())?;
        counts.extend(std::iter::repeat(tasks).take(repeat));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_in_slurm_by_default() {
        // In a test environment, we're not in a SLURM job
        // (unless running on a cluster, but CI won't be)
        if std::env::var("SLURM_JOB_ID").is_err() {
            assert!(!is_slurm_job());
            assert!(job_id().is_none());
            assert!(local_rank().is_none());
        }
    }

    #[test]
    fn compressed_task_lists() {
        assert_eq!(parse_tasks_per_node("4").unwrap(), vec![4]);
        assert_eq!(parse_tasks_per_node("4(x2),3").unwrap(), vec![4, 4, 3]);
        assert_eq!(parse_tasks_per_node("2,1(x3)").unwrap(), vec![2, 1, 1, 1]);
        assert!(parse_tasks_per_node("4(2)").is_err());
        assert!(parse_tasks_per_node("").is_err());
        assert!(parse_tasks_per_node("x").is_err());
    }

    /// Tests that mutate environment variables are combined into a single test
    /// to avoid data races when tests run in parallel.
    #[test]
    fn slurm_env_var_parsing() {
        unsafe {
            std::env::set_var("SLURM_TASKS_PER_NODE", "2(x2),1");
            std::env::remove_var("SLURM_NNODES");
        }
        let map = node_map().unwrap().unwrap();
        assert_eq!(map.len(), 5);
        assert_eq!(map.num_nodes(), 3);
        assert!(map.is_node_consecutive());

        // --- node count must agree ---
        unsafe {
            std::env::set_var("SLURM_NNODES", "2");
        }
        assert!(matches!(node_map(), Err(Error::InvalidTopology(_))));
        unsafe {
            std::env::set_var("SLURM_NNODES", "3");
        }
        assert_eq!(num_nodes(), Some(3));
        assert!(node_map().unwrap().is_some());

        // --- is_slurm_job: detects SLURM_JOB_ID ---
        unsafe {
            std::env::set_var("SLURM_JOB_ID", "12345");
        }
        assert!(is_slurm_job());
        assert_eq!(job_id(), Some("12345".to_string()));

        unsafe {
            std::env::remove_var("SLURM_JOB_ID");
            std::env::remove_var("SLURM_NNODES");
            std::env::remove_var("SLURM_TASKS_PER_NODE");
        }
        assert!(node_map().unwrap().is_none());
    }
}
