//! Tree maintenance for SeaORM models.
//!
//! Two interchangeable encodings of the same parent/child hierarchy are
//! provided behind the [`TreeStore`] trait:
//!
//! * [`ClosureTreeStore`] keeps every ancestor/descendant pair in an edge table;
//! * [`NestedSetStore`] keeps `[left_margin, right_margin]` intervals and a depth on each row.
//!
//! Both maintain a derived `global_active` flag (a node is globally active when
//! it and all of its ancestors are active) and can verify their own
//! invariants with `check_integrity`. PostgreSQL and SQLite are supported.

pub mod closure;
pub mod config;
pub mod error;
pub mod hooks;
pub mod integrity;
pub mod lock;
pub mod nested_set;
pub mod propagation;
pub mod store;
pub mod traits;

pub mod prelude {
    //! Convenient re-exports for consumers.
    pub use crate::closure::ClosureTreeStore;
    pub use crate::config::{AdvisoryLockStrategy, DefaultSort, TreeConfig, TreeOptions};
    pub use crate::error::TreeError;
    pub use crate::hooks::{NoHooks, TreeHooks, UpdateContext};
    pub use crate::nested_set::NestedSetStore;
    pub use crate::store::TreeStore;
    pub use crate::traits::{ClosureTreeModel, NestedSetModel, TreeModel};
}

pub use closure::ClosureTreeStore;
pub use config::{AdvisoryLockKey, AdvisoryLockStrategy, DefaultSort, TreeConfig, TreeOptions};
pub use error::TreeError;
pub use hooks::{NoHooks, TreeHooks, UpdateContext};
pub use integrity::{IntegrityReport, Violation};
pub use nested_set::NestedSetStore;
pub use propagation::ActiveFlagPropagator;
pub use store::TreeStore;
pub use traits::{ClosureTreeModel, NestedSetModel, TreeModel};
pub use tree_tables_macros::TreeModel;

#[doc(hidden)]
pub mod __private {
    pub use once_cell;
}
