use std::any::Any;

use async_trait::async_trait;
use sea_orm::DatabaseTransaction;

use crate::error::TreeError;
use crate::traits::TreeModel;

/// Host callbacks invoked by a store around its structural work.
///
/// Every hook runs inside the operation's transaction; returning an error
/// aborts the operation and rolls the transaction back. The record as it was
/// before an update is loaded once and passed to both update hooks, along
/// with whatever [`UpdateContext`] `on_before_update` returned.
#[async_trait]
pub trait TreeHooks<M: TreeModel>: Send + Sync {
    async fn on_after_insert(
        &self,
        _conn: &DatabaseTransaction,
        _node: &M,
    ) -> Result<(), TreeError> {
        Ok(())
    }

    async fn on_before_update(
        &self,
        _conn: &DatabaseTransaction,
        _old: &M,
        _changes: &M::ActiveModel,
    ) -> Result<UpdateContext, TreeError> {
        Ok(UpdateContext::default())
    }

    async fn on_after_update(
        &self,
        _conn: &DatabaseTransaction,
        _old: &M,
        _new: &M,
        _context: UpdateContext,
    ) -> Result<(), TreeError> {
        Ok(())
    }

    async fn on_before_delete(
        &self,
        _conn: &DatabaseTransaction,
        _node: &M,
    ) -> Result<(), TreeError> {
        Ok(())
    }

    /// Runs right before the row itself is removed.
    async fn on_delete(&self, _conn: &DatabaseTransaction, _node: &M) -> Result<(), TreeError> {
        Ok(())
    }
}

/// State handed from `on_before_update` to the `on_after_update` of the same call.
#[derive(Default)]
pub struct UpdateContext(Option<Box<dyn Any + Send + Sync>>);

impl UpdateContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref()
    }

    /// Removes the value if it is a `T`; a value of another type stays in place.
    pub fn take<T: Any>(&mut self) -> Option<T> {
        match self.0.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.0 = Some(other);
                None
            }
        }
    }
}

impl std::fmt::Debug for UpdateContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateContext")
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// Hook set that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

#[async_trait]
impl<M: TreeModel> TreeHooks<M> for NoHooks {}
