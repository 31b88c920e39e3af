//! Unit of work: one database transaction shared by every repository bound
//! to a poll cycle or command invocation.
//!
//! The worker begins a unit of work per cycle, builds the handler's
//! repositories against it, and commits iff the handler succeeded — so a
//! handler's business writes and the events it appends either all commit or
//! all roll back (the transactional-outbox contract).

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::Postgres;
use sqlx::{PgConnection, PgPool, Transaction};
use tokio::sync::{Mutex, MutexGuard};

use osa_domain::identity::Identity;

pub struct PgUnitOfWork {
    identity: Identity,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgUnitOfWork {
    /// Open a fresh transaction carrying the given identity.
    pub async fn begin(pool: &PgPool, identity: Identity) -> Result<Arc<Self>> {
        let tx = pool.begin().await.context("begin unit of work")?;
        Ok(Arc::new(PgUnitOfWork {
            identity,
            tx: Mutex::new(Some(tx)),
        }))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Lock the transaction slot. Repositories hold the guard only for the
    /// duration of a statement; never across other await points.
    pub(crate) async fn lock_tx(&self) -> MutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        self.tx.lock().await
    }

    /// Commit. Errors if the unit of work was already finished.
    pub async fn commit(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .context("unit of work already finished")?;
        tx.commit().await.context("commit unit of work")
    }

    /// Roll back. Errors if the unit of work was already finished.
    pub async fn rollback(&self) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .context("unit of work already finished")?;
        tx.rollback().await.context("rollback unit of work")
    }

    pub async fn is_finished(&self) -> bool {
        self.tx.lock().await.is_none()
    }
}

impl std::fmt::Debug for PgUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnitOfWork")
            .field("identity", &self.identity)
            .finish()
    }
}

/// Borrow the live connection out of a locked transaction slot.
pub(crate) fn conn<'a>(
    guard: &'a mut Option<Transaction<'static, Postgres>>,
) -> Result<&'a mut PgConnection> {
    guard
        .as_mut()
        .map(|tx| &mut **tx)
        .context("unit of work already finished")
}
