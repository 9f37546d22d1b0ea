use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Value,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::hooks::{NoHooks, TreeHooks};
use crate::integrity::{check_nested_set, IntegrityReport, MarginRow};
use crate::lock::LockedTransaction;
use crate::propagation::{outermost_intervals, ActiveFlagPropagator, PropagationScope};
use crate::store::{
    cascade_failure, ensure_supported, inherited_flag, next_sort, reject_written, require_node,
    require_parent, resolve_sort, write_fields, TreeStore,
};
use crate::traits::NestedSetModel;

/// Tree store encoding the hierarchy as nested `[left_margin, right_margin]` intervals.
///
/// Every structural change renumbers margins across the table, so all
/// mutations made through one store are serialised by a writer lock in
/// addition to the database transaction.
pub struct NestedSetStore<M>
where
    M: NestedSetModel,
{
    hooks: Arc<dyn TreeHooks<M>>,
    writer: Arc<Mutex<()>>,
    _marker: PhantomData<M>,
}

impl<M> Default for NestedSetStore<M>
where
    M: NestedSetModel,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Where a node (or a relocated subtree root) lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Slot {
    left: i32,
    depth: i32,
}

impl<M> NestedSetStore<M>
where
    M: NestedSetModel,
{
    pub fn new() -> Self {
        Self::with_hooks(NoHooks)
    }

    pub fn with_hooks(hooks: impl TreeHooks<M> + 'static) -> Self {
        Self {
            hooks: Arc::new(hooks),
            writer: Arc::new(Mutex::new(())),
            _marker: PhantomData,
        }
    }

    fn config(&self) -> &'static TreeConfig {
        M::tree_config()
    }

    async fn lock(&self, db: &DatabaseConnection) -> Result<LockedTransaction, TreeError> {
        LockedTransaction::acquire(
            self.config().advisory_lock_strategy(),
            db,
            Some(Arc::clone(&self.writer)),
        )
        .await
    }

    fn reject_structural(fields: &M::ActiveModel) -> Result<(), TreeError> {
        reject_written::<M>(fields, M::global_active_column(), "global_active")?;
        reject_written::<M>(fields, M::left_column(), "left_margin")?;
        reject_written::<M>(fields, M::right_column(), "right_margin")?;
        reject_written::<M>(fields, M::depth_column(), "depth_level")
    }

    /// Members of the interval of `node`, itself included.
    fn interval(node: &M) -> Condition {
        Condition::all()
            .add(M::left_column().gte(node.left_margin()))
            .add(M::right_column().lte(node.right_margin()))
    }

    /// Slot right after the last sibling ordered before `(sort, moving)`, or
    /// the first slot under `parent`.
    ///
    /// Siblings are ordered by `(sort, id)`. A new node has no id yet and
    /// goes after every sibling sorted at or before `sort`.
    /// Rows with negative margins are a subtree in flight and are ignored.
    async fn destination(
        txn: &DatabaseTransaction,
        parent: Option<&M>,
        sort: i32,
        moving: Option<&M::Id>,
    ) -> Result<Slot, TreeError> {
        let same_parent = match parent {
            Some(parent) => M::parent_column().eq(M::id_to_value(&parent.id())),
            None => M::parent_column().is_null(),
        };
        let before = match moving {
            Some(id) => Condition::any()
                .add(M::sort_column().lt(sort))
                .add(
                    Condition::all()
                        .add(M::sort_column().eq(sort))
                        .add(M::id_column().lt(M::id_to_value(id))),
                ),
            None => Condition::all().add(M::sort_column().lte(sort)),
        };
        let sibling = M::Entity::find()
            .filter(same_parent)
            .filter(before)
            .filter(M::left_column().gt(0))
            .order_by_desc(M::sort_column())
            .order_by_desc(M::id_column())
            .one(txn)
            .await?;

        Ok(match (sibling, parent) {
            (Some(sibling), _) => Slot {
                left: sibling.right_margin() + 1,
                depth: sibling.depth(),
            },
            (None, Some(parent)) => Slot {
                left: parent.left_margin() + 1,
                depth: parent.depth() + 1,
            },
            (None, None) => Slot { left: 1, depth: 1 },
        })
    }

    /// Shift everything at or after `at` right by `width` and widen the
    /// intervals that contain `at`.
    async fn open_gap(txn: &DatabaseTransaction, at: i32, width: i32) -> Result<(), TreeError> {
        M::Entity::update_many()
            .col_expr(M::left_column(), Expr::col(M::left_column()).add(width))
            .col_expr(M::right_column(), Expr::col(M::right_column()).add(width))
            .filter(M::left_column().gte(at))
            .exec(txn)
            .await?;
        M::Entity::update_many()
            .col_expr(M::right_column(), Expr::col(M::right_column()).add(width))
            .filter(M::left_column().lt(at))
            .filter(M::right_column().gte(at))
            .exec(txn)
            .await?;
        Ok(())
    }

    /// Pull every margin beyond `after` left by `width`.
    async fn close_gap(txn: &DatabaseTransaction, after: i32, width: i32) -> Result<(), TreeError> {
        M::Entity::update_many()
            .col_expr(M::right_column(), Expr::col(M::right_column()).sub(width))
            .filter(M::right_column().gt(after))
            .exec(txn)
            .await?;
        M::Entity::update_many()
            .col_expr(M::left_column(), Expr::col(M::left_column()).sub(width))
            .filter(M::left_column().gt(after))
            .exec(txn)
            .await?;
        Ok(())
    }

    /// Move the subtree of `node` under `parent_id`, after the siblings ordered before it.
    async fn relocate(
        &self,
        txn: &DatabaseTransaction,
        node: &M,
        parent_id: Option<&M::Id>,
        sort: i32,
    ) -> Result<(), TreeError> {
        let (left, right) = (node.left_margin(), node.right_margin());
        let width = right - left + 1;

        // detach: park the subtree on negative margins
        M::Entity::update_many()
            .col_expr(M::left_column(), Expr::col(M::left_column()).mul(-1))
            .col_expr(M::right_column(), Expr::col(M::right_column()).mul(-1))
            .filter(Self::interval(node))
            .exec(txn)
            .await?;

        Self::close_gap(txn, right, width).await?;

        let parent = match parent_id {
            Some(id) => Some(require_parent::<M, _>(txn, id).await?),
            None => None,
        };
        let slot = Self::destination(txn, parent.as_ref(), sort, Some(&node.id())).await?;
        Self::open_gap(txn, slot.left, width).await?;

        let shift = slot.left - left;
        let depth_delta = slot.depth - node.depth();
        M::Entity::update_many()
            .col_expr(
                M::left_column(),
                Expr::col(M::left_column()).mul(-1).add(shift),
            )
            .col_expr(
                M::right_column(),
                Expr::col(M::right_column()).mul(-1).add(shift),
            )
            .col_expr(
                M::depth_column(),
                Expr::col(M::depth_column()).add(depth_delta),
            )
            .filter(M::left_column().lt(0))
            .exec(txn)
            .await?;

        debug!(
            node = ?node.id(),
            from = left,
            to = slot.left,
            width,
            depth_delta,
            "relocated nested-set interval"
        );
        Ok(())
    }

    async fn insert_on(
        &self,
        txn: &DatabaseTransaction,
        mut fields: M::ActiveModel,
    ) -> Result<M, TreeError> {
        Self::reject_structural(&fields)?;

        let parent_id = M::pending_parent(&fields).flatten();
        let parent = match &parent_id {
            Some(id) => Some(require_parent::<M, _>(txn, id).await?),
            None => None,
        };
        let sort = resolve_sort::<M, _>(txn, M::pending_sort(&fields)).await?;
        let active = M::pending_active(&fields).unwrap_or(true);

        let slot = Self::destination(txn, parent.as_ref(), sort, None).await?;
        Self::open_gap(txn, slot.left, 2).await?;

        M::set_parent(&mut fields, parent_id.clone());
        fields.set(M::sort_column(), Value::from(sort));
        fields.set(M::active_column(), Value::from(active));
        fields.set(M::left_column(), Value::from(slot.left));
        fields.set(M::right_column(), Value::from(slot.left + 1));
        fields.set(M::depth_column(), Value::from(slot.depth));
        if self.config().use_global_active() {
            let flag = inherited_flag(parent.as_ref(), active);
            fields.set(M::global_active_column(), Value::from(flag));
        }

        let model = fields.insert(txn).await?;
        debug!(
            node = ?model.id(),
            parent = ?parent_id,
            left = slot.left,
            depth = slot.depth,
            "inserted nested-set node"
        );

        self.hooks.on_after_insert(txn, &model).await?;
        require_node::<M, _>(txn, &model.id()).await
    }

    async fn update_on(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
        mut fields: M::ActiveModel,
    ) -> Result<M, TreeError> {
        Self::reject_structural(&fields)?;
        let old = require_node::<M, _>(txn, id).await?;

        let parent_change = match M::pending_parent(&fields) {
            Some(parent) if parent != old.parent_id() => Some(parent),
            _ => None,
        };
        if let Some(Some(target)) = &parent_change {
            let target = require_parent::<M, _>(txn, target).await?;
            let inside = target.left_margin() >= old.left_margin()
                && target.left_margin() <= old.right_margin();
            if inside {
                return Err(TreeError::cycle(id, &target.id()));
            }
        }
        if parent_change.is_some() && M::pending_sort(&fields).is_none() {
            let sort = next_sort::<M, _>(txn).await?;
            fields.set(M::sort_column(), Value::from(sort));
        }

        let sort_change = M::pending_sort(&fields).filter(|sort| *sort != old.sort());
        let active_change = M::pending_active(&fields).is_some_and(|flag| flag != old.is_active());

        let context = self.hooks.on_before_update(txn, &old, &fields).await?;
        write_fields::<M, _>(txn, id, fields).await?;

        if parent_change.is_some() || sort_change.is_some() {
            let parent_id = match &parent_change {
                Some(new_parent) => new_parent.clone(),
                None => old.parent_id(),
            };
            let sort = sort_change.unwrap_or(old.sort());
            self.relocate(txn, &old, parent_id.as_ref(), sort).await?;
        }

        if self.config().use_global_active() && (parent_change.is_some() || active_change) {
            ActiveFlagPropagator::recalc::<M, _>(self, txn, id).await?;
        }

        let new = require_node::<M, _>(txn, id).await?;
        self.hooks.on_after_update(txn, &old, &new, context).await?;
        Ok(new)
    }

    async fn delete_on(&self, txn: &DatabaseTransaction, id: &M::Id) -> Result<(), TreeError> {
        let node = require_node::<M, _>(txn, id).await?;

        let inner = M::Entity::find()
            .filter(M::left_column().gt(node.left_margin()))
            .filter(M::left_column().lt(node.right_margin()))
            .one(txn)
            .await?;
        if inner.is_some() {
            return Err(TreeError::has_children(id));
        }

        self.hooks.on_before_delete(txn, &node).await?;
        self.hooks.on_delete(txn, &node).await?;

        M::Entity::delete_many()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .exec(txn)
            .await?;
        Self::close_gap(txn, node.right_margin(), 2).await?;

        debug!(node = ?id, left = node.left_margin(), "deleted nested-set node");
        Ok(())
    }
}

#[async_trait]
impl<M> TreeStore<M> for NestedSetStore<M>
where
    M: NestedSetModel,
{
    async fn insert(
        &self,
        db: &DatabaseConnection,
        fields: M::ActiveModel,
    ) -> Result<M, TreeError> {
        ensure_supported(db)?;
        let guard = self.lock(db).await?;
        let result = self.insert_on(guard.connection(), fields).await;
        guard.finish(result).await
    }

    async fn update(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
        fields: M::ActiveModel,
    ) -> Result<M, TreeError> {
        ensure_supported(db)?;
        let guard = self.lock(db).await?;
        let result = self.update_on(guard.connection(), id, fields).await;
        guard.finish(result).await
    }

    async fn delete(&self, db: &DatabaseConnection, id: &M::Id) -> Result<(), TreeError> {
        ensure_supported(db)?;
        let guard = self.lock(db).await?;
        let result = self.delete_on(guard.connection(), id).await;
        guard.finish(result).await
    }

    async fn delete_subtree(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
    ) -> Result<usize, TreeError> {
        ensure_supported(db)?;
        let root = require_node::<M, _>(db, id).await?;

        let members = M::Entity::find()
            .filter(Self::interval(&root))
            .order_by_desc(M::left_column())
            .all(db)
            .await?;

        let mut deleted = 0;
        for member in members {
            if let Err(err) = self.delete(db, &member.id()).await {
                return Err(cascade_failure(deleted, err));
            }
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn recalc_global_active(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
    ) -> Result<(), TreeError> {
        ensure_supported(db)?;
        let guard = self.lock(db).await?;
        let result = ActiveFlagPropagator::recalc::<M, _>(self, guard.connection(), id).await;
        guard.finish(result).await
    }

    async fn roots(&self, db: &DatabaseConnection) -> Result<Vec<M>, TreeError> {
        ensure_supported(db)?;
        let rows = M::Entity::find()
            .filter(M::parent_column().is_null())
            .order_by_asc(M::left_column())
            .all(db)
            .await?;
        Ok(rows)
    }

    async fn children(&self, db: &DatabaseConnection, id: &M::Id) -> Result<Vec<M>, TreeError> {
        ensure_supported(db)?;
        let rows = M::Entity::find()
            .filter(M::parent_column().eq(M::id_to_value(id)))
            .order_by_asc(M::left_column())
            .all(db)
            .await?;
        Ok(rows)
    }

    async fn ancestors(&self, db: &DatabaseConnection, id: &M::Id) -> Result<Vec<M>, TreeError> {
        ensure_supported(db)?;
        let node = require_node::<M, _>(db, id).await?;
        let rows = M::Entity::find()
            .filter(M::left_column().lt(node.left_margin()))
            .filter(M::right_column().gt(node.right_margin()))
            .order_by_asc(M::left_column())
            .all(db)
            .await?;
        Ok(rows)
    }

    async fn descendants(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
    ) -> Result<Vec<M>, TreeError> {
        ensure_supported(db)?;
        let node = require_node::<M, _>(db, id).await?;
        let rows = M::Entity::find()
            .filter(M::left_column().gt(node.left_margin()))
            .filter(M::right_column().lt(node.right_margin()))
            .order_by_asc(M::left_column())
            .all(db)
            .await?;
        Ok(rows)
    }

    async fn check_integrity(
        &self,
        db: &DatabaseConnection,
    ) -> Result<IntegrityReport<M::Id>, TreeError> {
        ensure_supported(db)?;
        let rows = M::Entity::find()
            .order_by_asc(M::left_column())
            .all(db)
            .await?
            .iter()
            .map(|node| MarginRow {
                id: node.id(),
                parent_id: node.parent_id(),
                left: node.left_margin(),
                right: node.right_margin(),
                depth: node.depth(),
            })
            .collect::<Vec<_>>();

        let report = IntegrityReport::new(check_nested_set(&rows));
        if !report.is_clean() {
            warn!(
                entity = self.config().entity_name(),
                violations = report.violations().len(),
                "nested set failed integrity check"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl<M> PropagationScope<M> for NestedSetStore<M>
where
    M: NestedSetModel,
{
    async fn mark_subtree(
        &self,
        txn: &DatabaseTransaction,
        root: &M,
        value: bool,
    ) -> Result<(), TreeError> {
        M::Entity::update_many()
            .col_expr(M::global_active_column(), Expr::value(value))
            .filter(Self::interval(root))
            .exec(txn)
            .await?;
        Ok(())
    }

    async fn outermost_inactive(
        &self,
        txn: &DatabaseTransaction,
        root: &M,
    ) -> Result<Vec<M>, TreeError> {
        let inactive = M::Entity::find()
            .filter(Self::interval(root))
            .filter(M::active_column().eq(false))
            .order_by_asc(M::left_column())
            .all(txn)
            .await?;
        Ok(outermost_intervals(inactive, |node| {
            (node.left_margin(), node.right_margin())
        }))
    }

    async fn mark_subtrees(
        &self,
        txn: &DatabaseTransaction,
        roots: &[M],
        value: bool,
    ) -> Result<(), TreeError> {
        if roots.is_empty() {
            return Ok(());
        }

        let spans = roots
            .iter()
            .fold(Condition::any(), |spans, root| spans.add(Self::interval(root)));
        M::Entity::update_many()
            .col_expr(M::global_active_column(), Expr::value(value))
            .filter(spans)
            .exec(txn)
            .await?;
        Ok(())
    }
}
