use std::collections::HashMap;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, Value,
};
use tracing::warn;

use crate::config::DefaultSort;
use crate::error::TreeError;
use crate::integrity::IntegrityReport;
use crate::traits::TreeModel;

/// Operations every tree representation provides.
///
/// Each mutation runs as one transaction; validation (existence, cycle and
/// leaf checks) happens before the first write, so a rejected call leaves
/// the tree untouched. `delete_subtree` is the exception: it deletes member
/// by member and stops at the first failure.
#[async_trait]
pub trait TreeStore<M: TreeModel>: Send + Sync {
    /// Insert a node built from `fields`; `parent_id`, `sort` and `active`
    /// are read from it, `global_active` must be left unset.
    async fn insert(&self, db: &DatabaseConnection, fields: M::ActiveModel)
        -> Result<M, TreeError>;

    /// Apply `fields` to an existing node, re-linking it when `parent_id` or
    /// `sort` change and propagating activity when `parent_id` or `active` do.
    async fn update(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
        fields: M::ActiveModel,
    ) -> Result<M, TreeError>;

    /// Delete a leaf node.
    async fn delete(&self, db: &DatabaseConnection, id: &M::Id) -> Result<(), TreeError>;

    /// Delete a node and everything below it, deepest first. Returns the
    /// number of removed nodes.
    async fn delete_subtree(&self, db: &DatabaseConnection, id: &M::Id)
        -> Result<usize, TreeError>;

    /// Recompute `global_active` for the subtree rooted at `id`.
    async fn recalc_global_active(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
    ) -> Result<(), TreeError>;

    async fn roots(&self, db: &DatabaseConnection) -> Result<Vec<M>, TreeError>;

    async fn children(&self, db: &DatabaseConnection, id: &M::Id) -> Result<Vec<M>, TreeError>;

    /// Strict ancestors of `id`, root first.
    async fn ancestors(&self, db: &DatabaseConnection, id: &M::Id) -> Result<Vec<M>, TreeError>;

    /// Strict descendants of `id`.
    async fn descendants(&self, db: &DatabaseConnection, id: &M::Id)
        -> Result<Vec<M>, TreeError>;

    async fn check_integrity(
        &self,
        db: &DatabaseConnection,
    ) -> Result<IntegrityReport<M::Id>, TreeError>;

    async fn find(&self, db: &DatabaseConnection, id: &M::Id) -> Result<Option<M>, TreeError> {
        ensure_supported(db)?;
        find_node::<M, _>(db, id).await
    }

    /// Re-parent `id`; without an explicit `sort` the node goes to the end of its new branch.
    async fn move_node(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
        new_parent: Option<M::Id>,
        sort: Option<i32>,
    ) -> Result<M, TreeError> {
        let mut fields = M::ActiveModel::default();
        M::set_parent(&mut fields, new_parent);
        if let Some(sort) = sort {
            fields.set(M::sort_column(), Value::from(sort));
        }
        self.update(db, id, fields).await
    }

    async fn set_active(
        &self,
        db: &DatabaseConnection,
        id: &M::Id,
        active: bool,
    ) -> Result<M, TreeError> {
        let mut fields = M::ActiveModel::default();
        fields.set(M::active_column(), Value::from(active));
        self.update(db, id, fields).await
    }
}

pub(crate) fn ensure_supported(conn: &impl ConnectionTrait) -> Result<(), TreeError> {
    match conn.get_database_backend() {
        DbBackend::Postgres | DbBackend::Sqlite => Ok(()),
        _ => Err(TreeError::UnsupportedBackend),
    }
}

pub(crate) async fn find_node<M: TreeModel, C: ConnectionTrait>(
    conn: &C,
    id: &M::Id,
) -> Result<Option<M>, TreeError> {
    let node = M::Entity::find()
        .filter(M::id_column().eq(M::id_to_value(id)))
        .one(conn)
        .await?;
    Ok(node)
}

pub(crate) async fn require_node<M: TreeModel, C: ConnectionTrait>(
    conn: &C,
    id: &M::Id,
) -> Result<M, TreeError> {
    find_node::<M, C>(conn, id)
        .await?
        .ok_or_else(|| TreeError::record_not_found(id))
}

pub(crate) async fn require_parent<M: TreeModel, C: ConnectionTrait>(
    conn: &C,
    id: &M::Id,
) -> Result<M, TreeError> {
    find_node::<M, C>(conn, id)
        .await?
        .ok_or_else(|| TreeError::parent_not_found(id))
}

/// Fail when the caller set a column the tree owns.
pub(crate) fn reject_written<M: TreeModel>(
    fields: &M::ActiveModel,
    column: <M::Entity as EntityTrait>::Column,
    name: &'static str,
) -> Result<(), TreeError> {
    if fields.get(column).is_set() {
        Err(TreeError::DerivedField(name))
    } else {
        Ok(())
    }
}

/// Write the caller's own columns onto row `id`.
pub(crate) async fn write_fields<M: TreeModel, C: ConnectionTrait>(
    conn: &C,
    id: &M::Id,
    mut fields: M::ActiveModel,
) -> Result<(), TreeError> {
    fields.not_set(M::id_column());
    if !fields.is_changed() {
        return Ok(());
    }

    M::Entity::update_many()
        .set(fields)
        .filter(M::id_column().eq(M::id_to_value(id)))
        .exec(conn)
        .await?;
    Ok(())
}

pub(crate) async fn next_sort<M: TreeModel, C: ConnectionTrait>(conn: &C) -> Result<i32, TreeError> {
    let last = M::Entity::find()
        .order_by_desc(M::sort_column())
        .one(conn)
        .await?;
    Ok(last.map_or(1, |node| node.sort() + 1))
}

pub(crate) async fn resolve_sort<M: TreeModel, C: ConnectionTrait>(
    conn: &C,
    requested: Option<i32>,
) -> Result<i32, TreeError> {
    match (requested, M::tree_config().default_sort()) {
        (Some(sort), _) => Ok(sort),
        (None, DefaultSort::Fixed(sort)) => Ok(sort),
        (None, DefaultSort::AfterLast) => next_sort::<M, C>(conn).await,
    }
}

/// `global_active` of a node with the given parent and own flag.
pub(crate) fn inherited_flag<M: TreeModel>(parent: Option<&M>, active: bool) -> bool {
    active && parent.map_or(true, |parent| parent.is_global_active())
}

/// Load the rows for `ids`, keeping the order of `ids`.
pub(crate) async fn load_ordered<M: TreeModel, C: ConnectionTrait>(
    conn: &C,
    ids: Vec<M::Id>,
) -> Result<Vec<M>, TreeError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let values = ids.iter().map(M::id_to_value).collect::<Vec<_>>();
    let mut rows = M::Entity::find()
        .filter(M::id_column().is_in(values))
        .all(conn)
        .await?;

    let position = ids
        .into_iter()
        .enumerate()
        .map(|(index, id)| (id, index))
        .collect::<HashMap<_, _>>();
    rows.sort_by_key(|row| position.get(&row.id()).copied().unwrap_or(usize::MAX));
    Ok(rows)
}

pub(crate) fn cascade_failure(deleted: usize, source: TreeError) -> TreeError {
    if deleted == 0 {
        return source;
    }
    warn!(deleted, error = %source, "subtree cascade stopped part-way");
    TreeError::PartialCascade {
        deleted,
        source: Box::new(source),
    }
}
