//! Recomputation of the derived `global_active` flag.
//!
//! `global_active(x) = active(x) && global_active(parent(x))`, with a root
//! depending on its own flag only. The algorithm is shared by both stores;
//! each store supplies the subtree primitives through [`PropagationScope`].

use async_trait::async_trait;
use sea_orm::DatabaseTransaction;
use tracing::debug;

use crate::error::TreeError;
use crate::store::{find_node, require_node};
use crate::traits::TreeModel;

/// Subtree primitives a store exposes to the propagator.
#[async_trait]
pub trait PropagationScope<M: TreeModel>: Send + Sync {
    /// Set `global_active` on `root` and all of its descendants.
    async fn mark_subtree(
        &self,
        txn: &DatabaseTransaction,
        root: &M,
        value: bool,
    ) -> Result<(), TreeError>;

    /// Inactive members of the subtree of `root` (itself included) that are
    /// not nested inside another inactive member.
    async fn outermost_inactive(
        &self,
        txn: &DatabaseTransaction,
        root: &M,
    ) -> Result<Vec<M>, TreeError>;

    /// Set `global_active` on every subtree rooted at one of `roots`.
    async fn mark_subtrees(
        &self,
        txn: &DatabaseTransaction,
        roots: &[M],
        value: bool,
    ) -> Result<(), TreeError>;
}

pub struct ActiveFlagPropagator;

impl ActiveFlagPropagator {
    /// Recompute `global_active` for the subtree rooted at `id`.
    ///
    /// Idempotent; safe to run at any time as a repair.
    pub async fn recalc<M, S>(
        scope: &S,
        txn: &DatabaseTransaction,
        id: &M::Id,
    ) -> Result<(), TreeError>
    where
        M: TreeModel,
        S: PropagationScope<M> + ?Sized,
    {
        let root = require_node::<M, _>(txn, id).await?;
        let inherited = match root.parent_id() {
            Some(parent_id) => find_node::<M, _>(txn, &parent_id)
                .await?
                .map_or(true, |parent| parent.is_global_active()),
            None => true,
        };

        if !(inherited && root.is_active()) {
            debug!(node = ?id, "subtree globally inactive");
            return scope.mark_subtree(txn, &root, false).await;
        }

        scope.mark_subtree(txn, &root, true).await?;
        let inactive = scope.outermost_inactive(txn, &root).await?;
        if !inactive.is_empty() {
            debug!(node = ?id, spans = inactive.len(), "deactivating inactive spans");
            scope.mark_subtrees(txn, &inactive, false).await?;
        }
        Ok(())
    }
}

/// Keep the items whose interval is not nested in an earlier kept one.
///
/// `items` must be ordered by ascending left bound.
pub fn outermost_intervals<T>(items: Vec<T>, bounds: impl Fn(&T) -> (i32, i32)) -> Vec<T> {
    let mut prev_right = i32::MIN;
    items
        .into_iter()
        .filter(|item| {
            let (_, right) = bounds(item);
            if right > prev_right {
                prev_right = right;
                true
            } else {
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_intervals_are_skipped() {
        let spans = vec![(2, 9), (3, 4), (5, 8), (6, 7), (10, 13), (11, 12)];
        let kept = outermost_intervals(spans, |span| *span);
        assert_eq!(kept, vec![(2, 9), (10, 13)]);
    }

    #[test]
    fn disjoint_intervals_are_all_kept() {
        let spans = vec![(1, 2), (3, 4), (5, 6)];
        assert_eq!(outermost_intervals(spans.clone(), |span| *span), spans);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(outermost_intervals(Vec::<(i32, i32)>::new(), |span| *span).is_empty());
    }
}
