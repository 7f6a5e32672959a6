//! Connection management.
//!
//! [`ConnectionManager`] owns the single shared handle produced by a
//! [`Driver`] together with the configuration it was opened from. Access is
//! split by type:
//!
//! - [`ConnectionManager::connection`] hands out a [`ConnectionGuard`], a
//!   shared (read) guard that only exposes `&Handle`. Any number of callers
//!   can run statements through guards concurrently.
//! - Opening, replacing and closing the handle happens only under the
//!   exclusive (write) lock, inside the manager. While any guard is alive the
//!   handle cannot be closed or swapped out from under it.
//!
//! Do not call [`ConnectionManager::close`] or [`ConnectionManager::reset`]
//! from a task that still holds a guard; the write lock waits for every guard
//! to be dropped.

use crate::db::driver::{DbHandle, Driver};
use crate::error::{DbError, DbResult};
use crate::models::ConnectionConfig;
use std::ops::Deref;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// State guarded by the manager's lock.
#[derive(Debug)]
struct Slot<H> {
    config: ConnectionConfig,
    handle: Option<H>,
    /// Number of handles opened so far.
    generation: u64,
}

/// Shared access to the live handle for the duration of one operation.
pub struct ConnectionGuard<'a, H> {
    handle: RwLockReadGuard<'a, H>,
    generation: u64,
}

impl<H> ConnectionGuard<'_, H> {
    /// Generation of the handle this guard refers to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<H> Deref for ConnectionGuard<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H> std::fmt::Debug for ConnectionGuard<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Owns the lazily established connection handle.
pub struct ConnectionManager<D: Driver> {
    driver: D,
    slot: RwLock<Slot<D::Handle>>,
}

impl<D: Driver> ConnectionManager<D> {
    /// Create a manager. No connection is made until first use.
    pub fn new(driver: D, config: ConnectionConfig) -> Self {
        Self {
            driver,
            slot: RwLock::new(Slot {
                config,
                handle: None,
                generation: 0,
            }),
        }
    }

    /// Get a live handle, connecting or reconnecting as needed.
    ///
    /// An existing handle is pinged first. A handle that fails the ping is
    /// closed and replaced; staleness alone never surfaces as an error.
    pub async fn connection(&self) -> DbResult<ConnectionGuard<'_, D::Handle>> {
        let slot = self.slot.read().await;
        let alive = match &slot.handle {
            Some(handle) => match handle.ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        generation = slot.generation,
                        error = %e,
                        "Connection failed health check, reconnecting"
                    );
                    false
                }
            },
            None => false,
        };
        if alive {
            return Self::share(slot);
        }
        drop(slot);

        let mut slot = self.slot.write().await;
        self.ensure_connected(&mut slot).await?;
        Self::share(RwLockWriteGuard::downgrade(slot))
    }

    /// Close and discard the current handle. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut slot = self.slot.write().await;
        Self::discard(&mut slot).await;
    }

    /// Replace the configuration and reconnect with it.
    ///
    /// The whole swap happens under the exclusive lock, so no caller can
    /// observe the old handle with the new configuration or vice versa. If the
    /// new connection cannot be opened, the new configuration stays in place
    /// and the next [`connection`](Self::connection) call retries it.
    pub async fn reset(&self, config: ConnectionConfig) -> DbResult<ConnectionGuard<'_, D::Handle>> {
        let mut slot = self.slot.write().await;
        info!(connection = %config.masked_connection_string(), "Resetting connection configuration");
        slot.config = config;
        Self::discard(&mut slot).await;
        self.ensure_connected(&mut slot).await?;
        Self::share(RwLockWriteGuard::downgrade(slot))
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> ConnectionConfig {
        self.slot.read().await.config.clone()
    }

    /// Number of handles opened so far.
    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    /// Whether a handle is currently held (it may still be stale).
    pub async fn is_connected(&self) -> bool {
        self.slot.read().await.handle.is_some()
    }

    /// Make sure the slot holds a healthy handle. Requires the write lock.
    async fn ensure_connected(&self, slot: &mut RwLockWriteGuard<'_, Slot<D::Handle>>) -> DbResult<()> {
        // Another caller may have reconnected while we waited for the lock
        let healthy = match &slot.handle {
            Some(handle) => handle.ping().await.is_ok(),
            None => false,
        };
        if healthy {
            return Ok(());
        }
        Self::discard(slot).await;

        let handle = self.driver.open(&slot.config).await.map_err(|e| match e {
            e @ DbError::Connection { .. } => e,
            other => DbError::connection(
                format!("Failed to open connection: {}", other),
                "Check that the database is reachable with the configured connection string",
            ),
        })?;

        slot.generation += 1;
        slot.handle = Some(handle);
        info!(generation = slot.generation, "Database connection established");
        Ok(())
    }

    async fn discard(slot: &mut RwLockWriteGuard<'_, Slot<D::Handle>>) {
        if let Some(handle) = slot.handle.take() {
            debug!(generation = slot.generation, "Closing database connection");
            handle.close().await;
        }
    }

    fn share(slot: RwLockReadGuard<'_, Slot<D::Handle>>) -> DbResult<ConnectionGuard<'_, D::Handle>> {
        let generation = slot.generation;
        let handle = RwLockReadGuard::try_map(slot, |s| s.handle.as_ref())
            .map_err(|_| DbError::internal("Connection handle missing after connect"))?;
        Ok(ConnectionGuard { handle, generation })
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}
