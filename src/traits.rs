use std::fmt::Debug;
use std::hash::Hash;

use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel, Value,
};

use crate::config::TreeConfig;

/// Column accessors shared by both tree representations.
///
/// Implementations are normally provided by `#[derive(TreeModel)]`.
pub trait TreeModel:
    Clone + Send + Sync + 'static + IntoActiveModel<Self::ActiveModel> + FromQueryResult
{
    type Entity: EntityTrait<Model = Self>;
    type ActiveModel: ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send + Sync;
    type Id: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn tree_config() -> &'static TreeConfig;

    fn id(&self) -> Self::Id;
    fn parent_id(&self) -> Option<Self::Id>;
    fn sort(&self) -> i32;
    fn is_active(&self) -> bool;
    fn is_global_active(&self) -> bool;
    fn id_to_value(id: &Self::Id) -> Value;

    fn set_parent(active: &mut Self::ActiveModel, parent: Option<Self::Id>);

    /// `parent_id` the caller asked for, `None` when the column was not set.
    fn pending_parent(active: &Self::ActiveModel) -> Option<Option<Self::Id>>;
    fn pending_sort(active: &Self::ActiveModel) -> Option<i32>;
    fn pending_active(active: &Self::ActiveModel) -> Option<bool>;

    fn id_column() -> <Self::Entity as EntityTrait>::Column;
    fn parent_column() -> <Self::Entity as EntityTrait>::Column;
    fn sort_column() -> <Self::Entity as EntityTrait>::Column;
    fn active_column() -> <Self::Entity as EntityTrait>::Column;
    fn global_active_column() -> <Self::Entity as EntityTrait>::Column;
}

/// A model whose ancestry is materialised in a separate edge (closure) table.
pub trait ClosureTreeModel: TreeModel {
    type EdgeEntity: EntityTrait<Model = Self::EdgeModel>;
    type EdgeModel: Clone + Send + Sync + 'static + FromQueryResult;

    fn edge_parent_column() -> <Self::EdgeEntity as EntityTrait>::Column;
    fn edge_child_column() -> <Self::EdgeEntity as EntityTrait>::Column;
    fn edge_depth_column() -> <Self::EdgeEntity as EntityTrait>::Column;
    fn edge_sort_column() -> <Self::EdgeEntity as EntityTrait>::Column;

    fn edge_parent(edge: &Self::EdgeModel) -> Self::Id;
    fn edge_child(edge: &Self::EdgeModel) -> Self::Id;
    fn edge_depth(edge: &Self::EdgeModel) -> i32;
    fn edge_sort(edge: &Self::EdgeModel) -> i32;
}

/// A model carrying nested-set margins and depth on its own row.
pub trait NestedSetModel: TreeModel {
    fn left_margin(&self) -> i32;
    fn right_margin(&self) -> i32;
    fn depth(&self) -> i32;

    fn left_column() -> <Self::Entity as EntityTrait>::Column;
    fn right_column() -> <Self::Entity as EntityTrait>::Column;
    fn depth_column() -> <Self::Entity as EntityTrait>::Column;
}
