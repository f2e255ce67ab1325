//! Safety-invariant checkers.
//!
//! These functions verify the Raft safety properties over a whole
//! cluster: election safety, log matching, commit bounds, and
//! agreement of applied prefixes. The cluster runtime already aborts on
//! an election-safety breach the moment it happens; the checkers here
//! give tests (and cautious callers) a `Result`-shaped view of the same
//! properties, suitable for asserting after or during a run.

use thiserror::Error;

use crate::cluster::Cluster;
use crate::raft::{NodeId, Role};

/// A violated safety property, with enough context to debug it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("election safety: {a} and {b} both lead term {term}")]
    ElectionSafety { term: u64, a: NodeId, b: NodeId },

    #[error(
        "log matching: {a} and {b} agree on term at index {index} but diverge at index {diverges_at}"
    )]
    LogMatching {
        a: NodeId,
        b: NodeId,
        index: u64,
        diverges_at: u64,
    },

    #[error(
        "commit bounds: {node} has last_applied {last_applied}, commit_index {commit_index}, log length {log_len}"
    )]
    CommitBounds {
        node: NodeId,
        last_applied: u64,
        commit_index: u64,
        log_len: u64,
    },

    #[error("applied prefixes: {a} and {b} applied different commands at position {position}")]
    AppliedDivergence { a: NodeId, b: NodeId, position: u64 },
}

/// At most one node leads any given term.
///
/// Checks both the historical registry (populated by the runtime) and
/// the instantaneous role assignment.
pub fn check_election_safety(cluster: &Cluster) -> Result<(), InvariantViolation> {
    for (&term, &recorded) in cluster.leaders_by_term() {
        for node in cluster.nodes() {
            if node.role() == Role::Leader && node.current_term() == term && node.id() != recorded
            {
                return Err(InvariantViolation::ElectionSafety {
                    term,
                    a: recorded,
                    b: node.id(),
                });
            }
        }
    }
    Ok(())
}

/// If two logs hold the same term at the same index, their prefixes up
/// to that index are identical.
pub fn check_log_matching(cluster: &Cluster) -> Result<(), InvariantViolation> {
    let nodes = cluster.nodes();
    for (i, a) in nodes.iter().enumerate() {
        for b in nodes.iter().skip(i + 1) {
            let common = a.log().last_index().min(b.log().last_index());
            // Find the highest index where both agree on the term.
            let mut anchor = 0;
            for index in (1..=common).rev() {
                if a.log().term_at(index) == b.log().term_at(index) {
                    anchor = index;
                    break;
                }
            }
            for index in 1..=anchor {
                if a.log().get(index) != b.log().get(index) {
                    return Err(InvariantViolation::LogMatching {
                        a: a.id(),
                        b: b.id(),
                        index: anchor,
                        diverges_at: index,
                    });
                }
            }
        }
    }
    Ok(())
}

/// `last_applied <= commit_index <= log length` on every node.
pub fn check_commit_bounds(cluster: &Cluster) -> Result<(), InvariantViolation> {
    for node in cluster.nodes() {
        let ok = node.last_applied() <= node.commit_index()
            && node.commit_index() <= node.log().last_index();
        if !ok {
            return Err(InvariantViolation::CommitBounds {
                node: node.id(),
                last_applied: node.last_applied(),
                commit_index: node.commit_index(),
                log_len: node.log().last_index(),
            });
        }
    }
    Ok(())
}

/// Applied command sequences are prefixes of one another across all
/// nodes: the state machines never diverge.
pub fn check_applied_prefixes(cluster: &Cluster) -> Result<(), InvariantViolation> {
    let nodes = cluster.nodes();
    for (i, a) in nodes.iter().enumerate() {
        for b in nodes.iter().skip(i + 1) {
            let common = a.applied().len().min(b.applied().len());
            for pos in 0..common {
                if a.applied()[pos] != b.applied()[pos] {
                    return Err(InvariantViolation::AppliedDivergence {
                        a: a.id(),
                        b: b.id(),
                        position: pos as u64,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Run every checker.
pub fn check_all(cluster: &Cluster) -> Result<(), InvariantViolation> {
    check_election_safety(cluster)?;
    check_log_matching(cluster)?;
    check_commit_bounds(cluster)?;
    check_applied_prefixes(cluster)?;
    Ok(())
}
