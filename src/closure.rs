use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, Query, SelectStatement};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Value,
};
use tracing::{debug, warn};

use crate::config::TreeConfig;
use crate::error::TreeError;
use crate::hooks::{NoHooks, TreeHooks};
use crate::integrity::{check_closure, EdgeRow, IntegrityReport, NodeRow};
use crate::lock::LockedTransaction;
use crate::propagation::{ActiveFlagPropagator, PropagationScope};
use crate::store::{
    cascade_failure, ensure_supported, inherited_flag, load_ordered, next_sort, reject_written,
    require_node, require_parent, resolve_sort, write_fields, TreeStore,
};
use crate::traits::ClosureTreeModel;

/// Tree store keeping every (ancestor, descendant) pair in an edge table.
pub struct ClosureTreeStore<M>
where
    M: ClosureTreeModel,
{
    hooks: Arc<dyn TreeHooks<M>>,
    _marker: PhantomData<M>,
}

impl<M> Default for ClosureTreeStore<M>
where
    M: ClosureTreeModel,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> ClosureTreeStore<M>
where
    M: ClosureTreeModel,
{
    pub fn new() -> Self {
        Self::with_hooks(NoHooks)
    }

    pub fn with_hooks(hooks: impl TreeHooks<M> + 'static) -> Self {
        Self {
            hooks: Arc::new(hooks),
            _marker: PhantomData,
        }
    }

    fn config(&self) -> &'static TreeConfig {
        M::tree_config()
    }

    async fn lock(&self, db: &DatabaseConnection) -> Result<LockedTransaction, TreeError> {
        LockedTransaction::acquire(self.config().advisory_lock_strategy(), db, None).await
    }

    fn edges() -> M::EdgeEntity {
        M::EdgeEntity::default()
    }

    fn edge_columns() -> [<M::EdgeEntity as EntityTrait>::Column; 4] {
        [
            M::edge_parent_column(),
            M::edge_child_column(),
            M::edge_depth_column(),
            M::edge_sort_column(),
        ]
    }

    /// `SELECT child_id FROM edges WHERE parent_id = id`: the node and all its descendants.
    fn subtree_ids(id: &M::Id) -> SelectStatement {
        Query::select()
            .column(M::edge_child_column())
            .from(Self::edges())
            .and_where(M::edge_parent_column().eq(M::id_to_value(id)))
            .to_owned()
    }

    async fn is_descendant_or_self<C: ConnectionTrait>(
        conn: &C,
        ancestor: &M::Id,
        candidate: &M::Id,
    ) -> Result<bool, TreeError> {
        let edge = M::EdgeEntity::find()
            .filter(M::edge_parent_column().eq(M::id_to_value(ancestor)))
            .filter(M::edge_child_column().eq(M::id_to_value(candidate)))
            .one(conn)
            .await?;
        Ok(edge.is_some())
    }

    /// Self edge plus a copy of every edge ending at the parent, re-targeted
    /// to the new node one level deeper.
    async fn insert_edges(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
        parent_id: Option<&M::Id>,
        sort: i32,
    ) -> Result<(), TreeError> {
        let backend = txn.get_database_backend();
        let child = M::id_to_value(id);

        let mut self_edge = Query::insert();
        self_edge
            .into_table(Self::edges())
            .columns(Self::edge_columns())
            .values([
                Expr::val(child.clone()).into(),
                Expr::val(child.clone()).into(),
                Expr::val(0).into(),
                Expr::val(sort).into(),
            ])
            .map_err(|err| TreeError::invariant(err.to_string()))?;
        txn.execute(backend.build(&self_edge)).await?;

        if let Some(parent_id) = parent_id {
            let ancestors = Query::select()
                .column(M::edge_parent_column())
                .expr(Expr::val(child))
                .expr(Expr::col(M::edge_depth_column()).add(1))
                .expr(Expr::val(sort))
                .from(Self::edges())
                .and_where(M::edge_child_column().eq(M::id_to_value(parent_id)))
                .to_owned();

            let mut copy = Query::insert();
            copy.into_table(Self::edges()).columns(Self::edge_columns());
            copy.select_from(ancestors)
                .map_err(|err| TreeError::invariant(err.to_string()))?;
            txn.execute(backend.build(&copy)).await?;
        }

        Ok(())
    }

    /// Drop the edges linking the subtree of `id` to its old ancestors,
    /// keeping the edges among subtree members.
    async fn detach(&self, txn: &DatabaseTransaction, id: &M::Id) -> Result<(), TreeError> {
        M::EdgeEntity::delete_many()
            .filter(M::edge_child_column().in_subquery(Self::subtree_ids(id)))
            .filter(M::edge_parent_column().not_in_subquery(Self::subtree_ids(id)))
            .exec(txn)
            .await?;
        Ok(())
    }

    /// Connect every ancestor-or-self of `new_parent` to every member of the subtree of `id`.
    async fn attach(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
        new_parent: &M::Id,
    ) -> Result<(), TreeError> {
        let upper = Alias::new("upper_edge");
        let lower = Alias::new("lower_edge");

        let pairs = Query::select()
            .expr(Expr::col((upper.clone(), M::edge_parent_column())))
            .expr(Expr::col((lower.clone(), M::edge_child_column())))
            .expr(
                Expr::col((upper.clone(), M::edge_depth_column()))
                    .add(Expr::col((lower.clone(), M::edge_depth_column())))
                    .add(1),
            )
            .expr(Expr::col((lower.clone(), M::edge_sort_column())))
            .from_as(Self::edges(), upper.clone())
            .from_as(Self::edges(), lower.clone())
            .and_where(Expr::col((lower, M::edge_parent_column())).eq(M::id_to_value(id)))
            .and_where(Expr::col((upper, M::edge_child_column())).eq(M::id_to_value(new_parent)))
            .to_owned();

        let mut insert = Query::insert();
        insert
            .into_table(Self::edges())
            .columns(Self::edge_columns());
        insert
            .select_from(pairs)
            .map_err(|err| TreeError::invariant(err.to_string()))?;

        let backend = txn.get_database_backend();
        txn.execute(backend.build(&insert)).await?;
        Ok(())
    }

    async fn insert_on(
        &self,
        txn: &DatabaseTransaction,
        mut fields: M::ActiveModel,
    ) -> Result<M, TreeError> {
        reject_written::<M>(&fields, M::global_active_column(), "global_active")?;

        let parent_id = M::pending_parent(&fields).flatten();
        let parent = match &parent_id {
            Some(id) => Some(require_parent::<M, _>(txn, id).await?),
            None => None,
        };
        let sort = resolve_sort::<M, _>(txn, M::pending_sort(&fields)).await?;
        let active = M::pending_active(&fields).unwrap_or(true);

        M::set_parent(&mut fields, parent_id.clone());
        fields.set(M::sort_column(), Value::from(sort));
        fields.set(M::active_column(), Value::from(active));
        if self.config().use_global_active() {
            let flag = inherited_flag(parent.as_ref(), active);
            fields.set(M::global_active_column(), Value::from(flag));
        }

        let model = fields.insert(txn).await?;
        let id = model.id();
        self.insert_edges(txn, &id, parent_id.as_ref(), sort).await?;
        debug!(node = ?id, parent = ?parent_id, sort, "inserted closure-table node");

        self.hooks.on_after_insert(txn, &model).await?;

        if self.config().use_global_active() {
            if let Some(parent_id) = &parent_id {
                ActiveFlagPropagator::recalc::<M, _>(self, txn, parent_id).await?;
            }
        }

        require_node::<M, _>(txn, &id).await
    }

    async fn update_on(
        &self,
        txn: &DatabaseTransaction,
        id: &M::Id,
        mut fields: M::ActiveModel,
    ) -> Result<M, TreeError> {
        reject_written::<M>(&fields, M::global_active_column(), "global_active")?;
        let old = require_node::<M, _>(txn, id).await?;

        let parent_change = match M::pending_parent(&fields) {
            Some(parent) if parent != old.parent_id() => Some(parent),
            _ => None,
        };
        if let Some(Some(target)) = &parent_change {
            require_parent::<M, _>(txn, target).await?;
            if Self::is_descendant_or_self(txn, id, target).await? {
                return Err(TreeError::cycle(id, target));
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

        if let Some(new_parent) = &parent_change {
            self.detach(txn, id).await?;
            if let Some(new_parent) = new_parent {
                self.attach(txn, id, new_parent).await?;
            }
            debug!(node = ?id, from = ?old.parent_id(), to = ?new_parent, "moved closure-table subtree");
        }

        if let Some(sort) = sort_change {
            M::EdgeEntity::update_many()
                .col_expr(M::edge_sort_column(), Expr::value(sort))
                .filter(M::edge_child_column().eq(M::id_to_value(id)))
                .exec(txn)
                .await?;
        }

        if self.config().use_global_active() && (parent_change.is_some() || active_change) {
            let parent = match &parent_change {
                Some(new_parent) => new_parent.clone(),
                None => old.parent_id(),
            };
            let scope_root = parent.unwrap_or_else(|| id.clone());
            ActiveFlagPropagator::recalc::<M, _>(self, txn, &scope_root).await?;
        }

        let new = require_node::<M, _>(txn, id).await?;
        self.hooks.on_after_update(txn, &old, &new, context).await?;
        Ok(new)
    }

    async fn delete_on(&self, txn: &DatabaseTransaction, id: &M::Id) -> Result<(), TreeError> {
        let node = require_node::<M, _>(txn, id).await?;

        let descendant = M::EdgeEntity::find()
            .filter(M::edge_parent_column().eq(M::id_to_value(id)))
            .filter(M::edge_child_column().ne(M::id_to_value(id)))
            .one(txn)
            .await?;
        if descendant.is_some() {
            return Err(TreeError::has_children(id));
        }

        self.hooks.on_before_delete(txn, &node).await?;
        self.hooks.on_delete(txn, &node).await?;

        if !self.config().constraint_delete() {
            M::EdgeEntity::delete_many()
                .filter(M::edge_child_column().eq(M::id_to_value(id)))
                .exec(txn)
                .await?;
        }
        M::Entity::delete_many()
            .filter(M::id_column().eq(M::id_to_value(id)))
            .exec(txn)
            .await?;

        debug!(node = ?id, "deleted closure-table node");
        Ok(())
    }

    /// Ancestor or descendant end of each edge, in order.
    fn edge_ends(edges: &[M::EdgeModel], ancestor_side: bool) -> Vec<M::Id> {
        edges
            .iter()
            .map(|edge| {
                if ancestor_side {
                    M::edge_parent(edge)
                } else {
                    M::edge_child(edge)
                }
            })
            .collect()
    }
}

#[async_trait]
impl<M> TreeStore<M> for ClosureTreeStore<M>
where
    M: ClosureTreeModel,
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

        let members = M::EdgeEntity::find()
            .filter(M::edge_parent_column().eq(M::id_to_value(id)))
            .order_by_desc(M::edge_depth_column())
            .all(db)
            .await?;
        if members.is_empty() {
            return Err(TreeError::record_not_found(id));
        }

        let mut deleted = 0;
        for member in Self::edge_ends(&members, false) {
            if let Err(err) = self.delete(db, &member).await {
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
            .order_by_asc(M::sort_column())
            .order_by_asc(M::id_column())
            .all(db)
            .await?;
        Ok(rows)
    }

    async fn children(&self, db: &DatabaseConnection, id: &M::Id) -> Result<Vec<M>, TreeError> {
        ensure_supported(db)?;
        let edges = M::EdgeEntity::find()
            .filter(M::edge_parent_column().eq(M::id_to_value(id)))
            .filter(M::edge_depth_column().eq(1))
            .order_by_asc(M::edge_sort_column())
            .order_by_asc(M::edge_child_column())
            .all(db)
            .await?;
        load_ordered::<M, _>(db, Self::edge_ends(&edges, false)).await
    }

    async fn ancestors(&self, db: &DatabaseConnection, id: &M::Id) -> Result<Vec<M>, TreeError> {
        ensure_supported(db)?;
        let edges = M::EdgeEntity::find()
            .filter(M::edge_child_column().eq(M::id_to_value(id)))
            .filter(M::edge_depth_column().gt(0))
            .order_by_desc(M::edge_depth_column())
            .all(db)
            .await?;
        load_ordered::<M, _>(db, Self::edge_ends(&edges, true)).await
    }

    async fn descendants(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
    ) -> Result<Vec<M>, TreeError> {
        ensure_supported(db)?;
        let edges = M::EdgeEntity::find()
            .filter(M::edge_parent_column().eq(M::id_to_value(id)))
            .filter(M::edge_depth_column().gt(0))
            .order_by_asc(M::edge_depth_column())
            .order_by_asc(M::edge_sort_column())
            .order_by_asc(M::edge_child_column())
            .all(db)
            .await?;
        load_ordered::<M, _>(db, Self::edge_ends(&edges, false)).await
    }

    async fn check_integrity(
        &self,
        db: &DatabaseConnection,
    ) -> Result<IntegrityReport<M::Id>, TreeError> {
        ensure_supported(db)?;
        let nodes = M::Entity::find()
            .all(db)
            .await?
            .iter()
            .map(|node| NodeRow {
                id: node.id(),
                parent_id: node.parent_id(),
                sort: node.sort(),
            })
            .collect::<Vec<_>>();
        let edges = M::EdgeEntity::find()
            .all(db)
            .await?
            .iter()
            .map(|edge| EdgeRow {
                ancestor: M::edge_parent(edge),
                descendant: M::edge_child(edge),
                depth: M::edge_depth(edge),
                sort: M::edge_sort(edge),
            })
            .collect::<Vec<_>>();

        let report = IntegrityReport::new(check_closure(&nodes, &edges));
        if !report.is_clean() {
            warn!(
                entity = self.config().entity_name(),
                violations = report.violations().len(),
                "closure table failed integrity check"
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl<M> PropagationScope<M> for ClosureTreeStore<M>
where
    M: ClosureTreeModel,
{
    async fn mark_subtree(
        &self,
        txn: &DatabaseTransaction,
        root: &M,
        value: bool,
    ) -> Result<(), TreeError> {
        M::Entity::update_many()
            .col_expr(M::global_active_column(), Expr::value(value))
            .filter(M::id_column().in_subquery(Self::subtree_ids(&root.id())))
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
            .filter(M::id_column().in_subquery(Self::subtree_ids(&root.id())))
            .filter(M::active_column().eq(false))
            .all(txn)
            .await?;
        if inactive.len() < 2 {
            return Ok(inactive);
        }

        let values = inactive
            .iter()
            .map(|node| M::id_to_value(&node.id()))
            .collect::<Vec<_>>();
        let nested = M::EdgeEntity::find()
            .filter(M::edge_parent_column().is_in(values.clone()))
            .filter(M::edge_child_column().is_in(values))
            .filter(M::edge_depth_column().gt(0))
            .all(txn)
            .await?;
        let covered = Self::edge_ends(&nested, false)
            .into_iter()
            .collect::<HashSet<_>>();

        Ok(inactive
            .into_iter()
            .filter(|node| !covered.contains(&node.id()))
            .collect())
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

        let values = roots
            .iter()
            .map(|node| M::id_to_value(&node.id()))
            .collect::<Vec<_>>();
        let members = Query::select()
            .column(M::edge_child_column())
            .from(Self::edges())
            .and_where(M::edge_parent_column().is_in(values))
            .to_owned();

        M::Entity::update_many()
            .col_expr(M::global_active_column(), Expr::value(value))
            .filter(M::id_column().in_subquery(members))
            .exec(txn)
            .await?;
        Ok(())
    }
}
