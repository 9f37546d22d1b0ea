//! Structural checks for both tree representations.
//!
//! The checks run over plain rows loaded from the database, so every
//! violation is reported (not just the first) together with the offending ids.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use serde::Serialize;

use crate::error::TreeError;

/// One broken invariant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation<Id> {
    /// `left_margin >= right_margin`.
    LeftNotBelowRight { id: Id, left: i32, right: i32 },
    /// Smallest left margin is not 1 or largest right margin is not twice the row count.
    MarginBounds {
        min_left: i32,
        max_right: i32,
        count: usize,
    },
    /// `right_margin - left_margin` is even.
    EvenWidth { id: Id },
    /// `left_margin - depth` is odd.
    DepthParity { id: Id },
    /// The same margin value is used more than once.
    DuplicateMargin { margin: i32, ids: Vec<Id> },
    /// Interval or depth disagrees with `parent_id`.
    MisplacedNode { id: Id },
    MissingSelfEdge { id: Id },
    MissingEdge {
        ancestor: Id,
        descendant: Id,
        depth: i32,
    },
    UnexpectedEdge { ancestor: Id, descendant: Id },
    WrongEdgeDepth {
        ancestor: Id,
        descendant: Id,
        expected: i32,
        actual: i32,
    },
    /// Edge `sort` differs from the sort of the node it ends at.
    StaleEdgeSort { ancestor: Id, descendant: Id },
    /// Following `parent_id` from this node loops.
    ParentCycle { id: Id },
}

/// Result of an integrity check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IntegrityReport<Id> {
    violations: Vec<Violation<Id>>,
}

impl<Id> IntegrityReport<Id> {
    pub fn new(violations: Vec<Violation<Id>>) -> Self {
        Self { violations }
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation<Id>] {
        &self.violations
    }

    pub fn into_violations(self) -> Vec<Violation<Id>> {
        self.violations
    }
}

impl<Id: Debug> IntegrityReport<Id> {
    pub fn into_result(self) -> Result<(), TreeError> {
        match self.violations.first() {
            None => Ok(()),
            Some(first) => Err(TreeError::IntegrityViolation {
                count: self.violations.len(),
                first: format!("{first:?}"),
            }),
        }
    }
}

impl<Id: Serialize> IntegrityReport<Id> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Nested-set columns of one node.
#[derive(Clone, Debug)]
pub struct MarginRow<Id> {
    pub id: Id,
    pub parent_id: Option<Id>,
    pub left: i32,
    pub right: i32,
    pub depth: i32,
}

pub fn check_nested_set<Id>(rows: &[MarginRow<Id>]) -> Vec<Violation<Id>>
where
    Id: Clone + Eq + Hash,
{
    let mut violations = Vec::new();
    if rows.is_empty() {
        return violations;
    }

    for row in rows {
        if row.left >= row.right {
            violations.push(Violation::LeftNotBelowRight {
                id: row.id.clone(),
                left: row.left,
                right: row.right,
            });
        }
        if (row.right - row.left).rem_euclid(2) == 0 {
            violations.push(Violation::EvenWidth { id: row.id.clone() });
        }
        if (row.left - row.depth).rem_euclid(2) != 0 {
            violations.push(Violation::DepthParity { id: row.id.clone() });
        }
    }

    let min_left = rows.iter().map(|row| row.left).min().unwrap_or_default();
    let max_right = rows.iter().map(|row| row.right).max().unwrap_or_default();
    let expected_max = i64::try_from(rows.len()).unwrap_or(i64::MAX) * 2;
    if min_left != 1 || i64::from(max_right) != expected_max {
        violations.push(Violation::MarginBounds {
            min_left,
            max_right,
            count: rows.len(),
        });
    }

    let mut owners: BTreeMap<i32, Vec<Id>> = BTreeMap::new();
    for row in rows {
        owners.entry(row.left).or_default().push(row.id.clone());
        owners.entry(row.right).or_default().push(row.id.clone());
    }
    for (margin, ids) in owners {
        if ids.len() > 1 {
            violations.push(Violation::DuplicateMargin { margin, ids });
        }
    }

    let by_id = rows
        .iter()
        .map(|row| (&row.id, row))
        .collect::<HashMap<_, _>>();
    for row in rows {
        let placed = match &row.parent_id {
            None => row.depth == 1,
            Some(parent_id) => by_id.get(parent_id).is_some_and(|parent| {
                parent.left < row.left
                    && parent.right > row.right
                    && parent.depth + 1 == row.depth
            }),
        };
        if !placed {
            violations.push(Violation::MisplacedNode { id: row.id.clone() });
        }
    }

    violations
}

/// Node columns relevant to the closure table.
#[derive(Clone, Debug)]
pub struct NodeRow<Id> {
    pub id: Id,
    pub parent_id: Option<Id>,
    pub sort: i32,
}

/// One closure-table edge.
#[derive(Clone, Debug)]
pub struct EdgeRow<Id> {
    pub ancestor: Id,
    pub descendant: Id,
    pub depth: i32,
    pub sort: i32,
}

pub fn check_closure<Id>(nodes: &[NodeRow<Id>], edges: &[EdgeRow<Id>]) -> Vec<Violation<Id>>
where
    Id: Clone + Eq + Hash,
{
    let mut violations = Vec::new();

    let parents = nodes
        .iter()
        .map(|node| (node.id.clone(), node.parent_id.clone()))
        .collect::<HashMap<_, _>>();
    let sorts = nodes
        .iter()
        .map(|node| (node.id.clone(), node.sort))
        .collect::<HashMap<_, _>>();
    let actual = edges
        .iter()
        .map(|edge| ((edge.ancestor.clone(), edge.descendant.clone()), edge.depth))
        .collect::<HashMap<_, _>>();

    let mut expected = HashSet::new();
    for node in nodes {
        let mut chain = vec![(node.id.clone(), 0)];
        let mut seen = HashSet::from([node.id.clone()]);
        let mut current = node.parent_id.clone();
        let mut depth = 1;

        while let Some(ancestor) = current {
            if !seen.insert(ancestor.clone()) {
                violations.push(Violation::ParentCycle {
                    id: node.id.clone(),
                });
                break;
            }
            current = parents.get(&ancestor).cloned().flatten();
            chain.push((ancestor, depth));
            depth += 1;
        }

        for (ancestor, depth) in chain {
            let key = (ancestor, node.id.clone());
            match actual.get(&key) {
                None if depth == 0 => violations.push(Violation::MissingSelfEdge {
                    id: node.id.clone(),
                }),
                None => violations.push(Violation::MissingEdge {
                    ancestor: key.0.clone(),
                    descendant: key.1.clone(),
                    depth,
                }),
                Some(found) if *found != depth => violations.push(Violation::WrongEdgeDepth {
                    ancestor: key.0.clone(),
                    descendant: key.1.clone(),
                    expected: depth,
                    actual: *found,
                }),
                Some(_) => {}
            }
            expected.insert(key);
        }
    }

    for edge in edges {
        let key = (edge.ancestor.clone(), edge.descendant.clone());
        if !expected.contains(&key) {
            violations.push(Violation::UnexpectedEdge {
                ancestor: key.0,
                descendant: key.1,
            });
            continue;
        }
        if sorts.get(&edge.descendant) != Some(&edge.sort) {
            violations.push(Violation::StaleEdgeSort {
                ancestor: key.0,
                descendant: key.1,
            });
        }
    }

    violations
}
