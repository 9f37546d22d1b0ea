//! Drives both stores with the same random operation sequence and compares them.

mod common;

use std::collections::HashMap;
use std::fmt::Display;

use proptest::prelude::*;
use proptest::sample::Index;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait, QueryOrder};
use tree_tables::{ClosureTreeStore, NestedSetStore, TreeError, TreeModel, TreeStore};

use common::{ancestor_ids, closure_fields, closure_node, ns_fields, ns_node, setup_database};

#[derive(Clone, Debug)]
enum Op {
    Insert {
        parent: Option<Index>,
        sort: i32,
        active: bool,
    },
    Move {
        node: Index,
        parent: Option<Index>,
        sort: Option<i32>,
    },
    Resort {
        node: Index,
        sort: i32,
    },
    SetActive {
        node: Index,
        active: bool,
    },
    Delete {
        node: Index,
    },
    DeleteSubtree {
        node: Index,
    },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<Option<Index>>(), 0..4i32, prop::bool::weighted(0.8))
            .prop_map(|(parent, sort, active)| Op::Insert { parent, sort, active }),
        2 => (any::<Index>(), any::<Option<Index>>(), prop::option::of(0..4i32))
            .prop_map(|(node, parent, sort)| Op::Move { node, parent, sort }),
        2 => (any::<Index>(), 0..4i32).prop_map(|(node, sort)| Op::Resort { node, sort }),
        2 => (any::<Index>(), any::<bool>())
            .prop_map(|(node, active)| Op::SetActive { node, active }),
        1 => any::<Index>().prop_map(|node| Op::Delete { node }),
        1 => any::<Index>().prop_map(|node| Op::DeleteSubtree { node }),
    ]
}

fn fail(err: impl Display) -> TestCaseError {
    TestCaseError::fail(err.to_string())
}

fn pick(live: &[i32], index: &Index) -> Option<i32> {
    if live.is_empty() {
        None
    } else {
        Some(live[index.index(live.len())])
    }
}

fn ids<M>(nodes: Result<Vec<M>, TreeError>) -> Result<Vec<i32>, TestCaseError>
where
    M: TreeModel<Id = i32>,
{
    Ok(nodes.map_err(fail)?.iter().map(TreeModel::id).collect())
}

/// Error kind, so outcomes of the two stores can be compared.
fn outcome<T>(result: &Result<T, TreeError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(TreeError::Cycle { .. }) => "cycle",
        Err(TreeError::HasChildren(_)) => "has_children",
        Err(TreeError::RecordNotFound(_)) => "record_not_found",
        Err(TreeError::ParentNotFound(_)) => "parent_not_found",
        Err(TreeError::PartialCascade { .. }) => "partial_cascade",
        Err(_) => "other",
    }
}

struct Pair {
    db: DatabaseConnection,
    closure: ClosureTreeStore<closure_node::Model>,
    nested: NestedSetStore<ns_node::Model>,
}

impl Pair {
    async fn live_ids(&self) -> Result<Vec<i32>, TestCaseError> {
        let closure = closure_node::Entity::find()
            .order_by_asc(closure_node::Column::Id)
            .all(&self.db)
            .await
            .map_err(fail)?
            .into_iter()
            .map(|node| node.id)
            .collect::<Vec<_>>();
        let nested = ns_node::Entity::find()
            .order_by_asc(ns_node::Column::Id)
            .all(&self.db)
            .await
            .map_err(fail)?
            .into_iter()
            .map(|node| node.id)
            .collect::<Vec<_>>();
        prop_assert_eq!(&closure, &nested);
        Ok(closure)
    }

    async fn apply(&self, op: &Op, live: &[i32]) -> Result<(), TestCaseError> {
        let (closure, nested) = match op {
            Op::Insert {
                parent,
                sort,
                active,
            } => {
                let parent = parent.as_ref().and_then(|index| pick(live, index));
                let mut ct = closure_fields("node", parent, Some(*sort));
                ct.active = Set(*active);
                let mut ns = ns_fields("node", parent, Some(*sort));
                ns.active = Set(*active);
                let closure = self.closure.insert(&self.db, ct).await.map(|node| node.id);
                let nested = self.nested.insert(&self.db, ns).await.map(|node| node.id);
                prop_assert_eq!(closure.as_ref().ok(), nested.as_ref().ok());
                (outcome(&closure), outcome(&nested))
            }
            Op::Move { node, parent, sort } => {
                let Some(id) = pick(live, node) else {
                    return Ok(());
                };
                let parent = parent.as_ref().and_then(|index| pick(live, index));
                let closure = self.closure.move_node(&self.db, &id, parent, *sort).await;
                let nested = self.nested.move_node(&self.db, &id, parent, *sort).await;
                (outcome(&closure), outcome(&nested))
            }
            Op::Resort { node, sort } => {
                let Some(id) = pick(live, node) else {
                    return Ok(());
                };
                let ct = closure_node::ActiveModel {
                    sort: Set(*sort),
                    ..Default::default()
                };
                let ns = ns_node::ActiveModel {
                    sort: Set(*sort),
                    ..Default::default()
                };
                let closure = self.closure.update(&self.db, &id, ct).await;
                let nested = self.nested.update(&self.db, &id, ns).await;
                (outcome(&closure), outcome(&nested))
            }
            Op::SetActive { node, active } => {
                let Some(id) = pick(live, node) else {
                    return Ok(());
                };
                let closure = self.closure.set_active(&self.db, &id, *active).await;
                let nested = self.nested.set_active(&self.db, &id, *active).await;
                (outcome(&closure), outcome(&nested))
            }
            Op::Delete { node } => {
                let Some(id) = pick(live, node) else {
                    return Ok(());
                };
                let closure = self.closure.delete(&self.db, &id).await;
                let nested = self.nested.delete(&self.db, &id).await;
                (outcome(&closure), outcome(&nested))
            }
            Op::DeleteSubtree { node } => {
                let Some(id) = pick(live, node) else {
                    return Ok(());
                };
                let closure = self.closure.delete_subtree(&self.db, &id).await;
                let nested = self.nested.delete_subtree(&self.db, &id).await;
                prop_assert_eq!(closure.as_ref().ok(), nested.as_ref().ok());
                (outcome(&closure), outcome(&nested))
            }
        };
        prop_assert_eq!(closure, nested, "stores disagree on {:?}", op);
        prop_assert!(
            matches!(closure, "ok" | "cycle" | "has_children"),
            "unexpected outcome {} for {:?}",
            closure,
            op
        );
        Ok(())
    }

    async fn compare(&self) -> Result<(), TestCaseError> {
        let closure_report = self.closure.check_integrity(&self.db).await.map_err(fail)?;
        prop_assert!(closure_report.is_clean(), "{:?}", closure_report);
        let nested_report = self.nested.check_integrity(&self.db).await.map_err(fail)?;
        prop_assert!(nested_report.is_clean(), "{:?}", nested_report);

        let closure_rows = closure_node::Entity::find().all(&self.db).await.map_err(fail)?;
        let nested_rows = ns_node::Entity::find().all(&self.db).await.map_err(fail)?;
        common::assert_global_active_consistent(&closure_rows);
        common::assert_global_active_consistent(&nested_rows);

        let flags = closure_rows
            .iter()
            .map(|node| (node.id, (node.parent_id, node.global_active)))
            .collect::<HashMap<_, _>>();
        for node in &nested_rows {
            prop_assert_eq!(
                flags.get(&node.id),
                Some(&(node.parent_id, node.global_active))
            );

            let closure_ancestors =
                ancestor_ids::<closure_node::Model, _>(&self.closure, &self.db, node.id)
                    .await
                    .map_err(fail)?;
            let nested_ancestors =
                ancestor_ids::<ns_node::Model, _>(&self.nested, &self.db, node.id)
                    .await
                    .map_err(fail)?;
            prop_assert_eq!(closure_ancestors, nested_ancestors, "ancestors of {}", node.id);

            let closure_children = ids(self.closure.children(&self.db, &node.id).await);
            let nested_children = ids(self.nested.children(&self.db, &node.id).await);
            prop_assert_eq!(closure_children?, nested_children?, "children of {}", node.id);
        }

        let closure_roots = ids(self.closure.roots(&self.db).await)?;
        let nested_roots = ids(self.nested.roots(&self.db).await)?;
        prop_assert_eq!(closure_roots, nested_roots, "root order");
        Ok(())
    }
}

fn run(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(fail)?;

    runtime.block_on(async {
        let pair = Pair {
            db: setup_database().await.map_err(fail)?,
            closure: ClosureTreeStore::new(),
            nested: NestedSetStore::new(),
        };

        for op in &ops {
            let live = pair.live_ids().await?;
            pair.apply(op, &live).await?;
        }
        pair.live_ids().await?;
        pair.compare().await
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn closure_and_nested_set_stay_equivalent(ops in prop::collection::vec(op(), 1..40)) {
        run(ops)?;
    }
}
