use std::fmt::Debug;

use thiserror::Error;

/// Errors returned by the tree stores.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("tree-tables supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("parent node {0} does not exist")]
    ParentNotFound(String),

    #[error("node {0} does not exist")]
    RecordNotFound(String),

    #[error("cannot move node {node} under {target}: target lies inside its subtree")]
    Cycle { node: String, target: String },

    #[error("node {0} has children; delete the subtree or re-parent them first")]
    HasChildren(String),

    #[error("column `{0}` is maintained by the tree and cannot be written")]
    DerivedField(&'static str),

    #[error("integrity check found {count} violation(s), first: {first}")]
    IntegrityViolation { count: usize, first: String },

    #[error("cascade stopped after deleting {deleted} node(s): {source}")]
    PartialCascade {
        deleted: usize,
        #[source]
        source: Box<TreeError>,
    },

    #[error("tree invariant violation: {0}")]
    Invariant(String),
}

impl TreeError {
    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }

    pub(crate) fn parent_not_found(id: &impl Debug) -> Self {
        Self::ParentNotFound(format!("{id:?}"))
    }

    pub(crate) fn record_not_found(id: &impl Debug) -> Self {
        Self::RecordNotFound(format!("{id:?}"))
    }

    pub(crate) fn cycle(node: &impl Debug, target: &impl Debug) -> Self {
        Self::Cycle {
            node: format!("{node:?}"),
            target: format!("{target:?}"),
        }
    }

    pub(crate) fn has_children(id: &impl Debug) -> Self {
        Self::HasChildren(format!("{id:?}"))
    }
}
