use std::sync::Arc;

use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait, Value,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::AdvisoryLockStrategy;
use crate::error::TreeError;

/// A database transaction that optionally holds the in-process writer lock
/// and a PostgreSQL advisory lock until it is committed or rolled back.
///
/// The advisory lock is transaction scoped, so PostgreSQL releases it only
/// once the transaction's writes are visible (or discarded).
pub struct LockedTransaction {
    txn: DatabaseTransaction,
    writer: Option<OwnedMutexGuard<()>>,
}

impl LockedTransaction {
    pub async fn acquire(
        strategy: &AdvisoryLockStrategy,
        db: &DatabaseConnection,
        writer: Option<Arc<Mutex<()>>>,
    ) -> Result<Self, TreeError> {
        // Taken before the transaction so waiting writers do not pin a pooled connection.
        let writer = match writer {
            Some(mutex) => Some(mutex.lock_owned().await),
            None => None,
        };

        let key = match (strategy, db.get_database_backend()) {
            (AdvisoryLockStrategy::Namespaced(key), DbBackend::Postgres) => Some(key.as_str()),
            _ => None,
        };

        let txn = db.begin().await?;

        if let Some(key) = key {
            if let Err(err) = acquire_xact_lock(&txn, key).await {
                let _ = txn.rollback().await;
                return Err(err);
            }
        }

        Ok(Self { txn, writer })
    }

    pub fn connection(&self) -> &DatabaseTransaction {
        &self.txn
    }

    pub async fn commit(self) -> Result<(), TreeError> {
        let Self { txn, writer } = self;
        txn.commit().await?;
        drop(writer);
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), TreeError> {
        let Self { txn, writer } = self;
        txn.rollback().await?;
        drop(writer);
        Ok(())
    }

    /// Commit on success, roll back on failure, and hand the outcome back.
    pub async fn finish<T>(self, result: Result<T, TreeError>) -> Result<T, TreeError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.rollback().await;
                Err(err)
            }
        }
    }
}

/// `pg_advisory_xact_lock` is released by PostgreSQL at commit or rollback.
async fn acquire_xact_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), TreeError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_xact_lock(hashtext($1), 0)",
        vec![Value::from(key)],
    ))
    .await?;
    Ok(())
}
