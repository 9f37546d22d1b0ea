#![allow(dead_code)]

use std::collections::HashMap;
use std::error::Error;
use std::str::FromStr;

use sea_orm::{ActiveValue::Set, ConnectionTrait, DatabaseConnection, SqlxSqliteConnector};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tree_tables::{TreeError, TreeModel, TreeStore};

pub mod closure_node {
    use sea_orm::entity::prelude::*;
    use tree_tables::TreeModel;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "ct_nodes")]
    #[tree(edge_module = "super::closure_edge")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub name: String,
        pub sort: i32,
        pub active: bool,
        pub global_active: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod closure_edge {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "ct_edges")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub parent_id: i32,
        #[sea_orm(primary_key, auto_increment = false)]
        pub child_id: i32,
        pub depth_level: i32,
        pub sort: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod ns_node {
    use sea_orm::entity::prelude::*;
    use tree_tables::TreeModel;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "ns_nodes")]
    #[tree(nested_set)]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub name: String,
        pub sort: i32,
        pub active: bool,
        pub global_active: bool,
        pub left_margin: i32,
        pub right_margin: i32,
        pub depth_level: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Closure model with every configuration switch flipped from its default.
pub mod configured_node {
    use sea_orm::entity::prelude::*;
    use tree_tables::TreeModel;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "cfg_nodes")]
    #[tree(
        edge_module = "super::configured_edge",
        global_active = false,
        default_sort = 500,
        constraint_delete = true
    )]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub name: String,
        pub sort: i32,
        pub active: bool,
        pub global_active: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod configured_edge {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "cfg_edges")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub parent_id: i32,
        #[sea_orm(primary_key, auto_increment = false)]
        pub child_id: i32,
        pub depth_level: i32,
        pub sort: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Nested-set model that leaves `global_active` to the database.
pub mod plain_ns_node {
    use sea_orm::entity::prelude::*;
    use tree_tables::TreeModel;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, TreeModel)]
    #[sea_orm(table_name = "plain_ns_nodes")]
    #[tree(nested_set, global_active = false)]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub parent_id: Option<i32>,
        pub name: String,
        pub sort: i32,
        pub active: bool,
        pub global_active: bool,
        pub left_margin: i32,
        pub right_margin: i32,
        pub depth_level: i32,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE ct_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        name TEXT NOT NULL,
        sort INTEGER NOT NULL,
        active BOOLEAN NOT NULL DEFAULT 1,
        global_active BOOLEAN NOT NULL DEFAULT 1
    )",
    "CREATE TABLE ct_edges (
        parent_id INTEGER NOT NULL,
        child_id INTEGER NOT NULL,
        depth_level INTEGER NOT NULL,
        sort INTEGER NOT NULL,
        PRIMARY KEY (parent_id, child_id)
    )",
    "CREATE TABLE ns_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        name TEXT NOT NULL,
        sort INTEGER NOT NULL,
        active BOOLEAN NOT NULL DEFAULT 1,
        global_active BOOLEAN NOT NULL DEFAULT 1,
        left_margin INTEGER NOT NULL,
        right_margin INTEGER NOT NULL,
        depth_level INTEGER NOT NULL
    )",
    "CREATE TABLE cfg_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        name TEXT NOT NULL,
        sort INTEGER NOT NULL,
        active BOOLEAN NOT NULL DEFAULT 1,
        global_active BOOLEAN NOT NULL DEFAULT 1
    )",
    "CREATE TABLE cfg_edges (
        parent_id INTEGER NOT NULL REFERENCES cfg_nodes (id) ON DELETE CASCADE,
        child_id INTEGER NOT NULL REFERENCES cfg_nodes (id) ON DELETE CASCADE,
        depth_level INTEGER NOT NULL,
        sort INTEGER NOT NULL,
        PRIMARY KEY (parent_id, child_id)
    )",
    "CREATE TABLE plain_ns_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER NULL,
        name TEXT NOT NULL,
        sort INTEGER NOT NULL,
        active BOOLEAN NOT NULL DEFAULT 1,
        global_active BOOLEAN NOT NULL DEFAULT 1,
        left_margin INTEGER NOT NULL,
        right_margin INTEGER NOT NULL,
        depth_level INTEGER NOT NULL
    )",
];

/// Fresh in-memory SQLite database with every tree schema, foreign keys enforced.
///
/// The pool holds exactly one connection that never expires, so the
/// in-memory database lives as long as the returned handle.
pub async fn setup_database() -> Result<DatabaseConnection, Box<dyn Error>> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);
    for statement in SCHEMA {
        db.execute_unprepared(statement).await?;
    }
    Ok(db)
}

pub fn closure_fields(
    name: &str,
    parent_id: Option<i32>,
    sort: Option<i32>,
) -> closure_node::ActiveModel {
    let mut fields = closure_node::ActiveModel {
        name: Set(name.to_owned()),
        parent_id: Set(parent_id),
        ..Default::default()
    };
    if let Some(sort) = sort {
        fields.sort = Set(sort);
    }
    fields
}

pub fn ns_fields(name: &str, parent_id: Option<i32>, sort: Option<i32>) -> ns_node::ActiveModel {
    let mut fields = ns_node::ActiveModel {
        name: Set(name.to_owned()),
        parent_id: Set(parent_id),
        ..Default::default()
    };
    if let Some(sort) = sort {
        fields.sort = Set(sort);
    }
    fields
}

/// Names of `nodes`, in order.
pub fn names<M>(nodes: &[M], name: impl Fn(&M) -> &str) -> Vec<String> {
    nodes.iter().map(|node| name(node).to_owned()).collect()
}

/// Verify `global_active(x) == active(x) && global_active(parent(x))` for every row.
pub fn assert_global_active_consistent<M: TreeModel<Id = i32>>(rows: &[M]) {
    let by_id = rows
        .iter()
        .map(|row| (row.id(), row))
        .collect::<HashMap<_, _>>();
    for row in rows {
        let inherited = row
            .parent_id()
            .and_then(|parent| by_id.get(&parent))
            .map_or(true, |parent| parent.is_global_active());
        assert_eq!(
            row.is_global_active(),
            row.is_active() && inherited,
            "global_active mismatch on node {}",
            row.id()
        );
    }
}

/// Ids of the strict ancestors of `id`, root first.
pub async fn ancestor_ids<M, S>(
    store: &S,
    db: &DatabaseConnection,
    id: i32,
) -> Result<Vec<i32>, TreeError>
where
    M: TreeModel<Id = i32>,
    S: TreeStore<M>,
{
    Ok(store
        .ancestors(db, &id)
        .await?
        .iter()
        .map(|node| node.id())
        .collect())
}
