//! Integration with `deadpool` managed pools.
//!
//! The pool owns the single-caller discipline for connections: it hands a
//! connection to one caller at a time, and on return it recycles the
//! connection through [`Connection::reset_session`] and
//! [`Connection::ping`]. A connection reporting the bad-connection sentinel
//! fails recycling, which makes the pool discard it and create a fresh one.

use std::sync::Arc;

use deadpool::managed::{Manager, Metrics, Pool, RecycleError, RecycleResult};

use crate::connection::Connection;
use crate::connector::Driver;
use crate::context::Context;
use crate::error::SpannerMiddlewareError;

/// `deadpool` manager producing connections for one descriptor.
pub struct ConnectionManager {
    driver: Arc<Driver>,
    descriptor: String,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(driver: Arc<Driver>, descriptor: impl Into<String>) -> Self {
        Self {
            driver,
            descriptor: descriptor.into(),
        }
    }

    /// Build a pool with deadpool's defaults.
    ///
    /// # Errors
    /// Returns the pool builder's error, e.g. for a missing runtime.
    pub fn pool(self) -> Result<ConnectionPool, deadpool::managed::BuildError> {
        Pool::builder(self).build()
    }
}

impl Manager for ConnectionManager {
    type Type = Connection;
    type Error = SpannerMiddlewareError;

    async fn create(&self) -> Result<Connection, Self::Error> {
        self.driver
            .open(&Context::background(), &self.descriptor)
            .await
    }

    async fn recycle(
        &self,
        conn: &mut Connection,
        _metrics: &Metrics,
    ) -> RecycleResult<Self::Error> {
        let ctx = Context::background();
        conn.reset_session(&ctx).await.map_err(RecycleError::Backend)?;
        conn.ping(&ctx).await.map_err(RecycleError::Backend)?;
        Ok(())
    }
}

/// A managed pool of [`Connection`]s.
pub type ConnectionPool = Pool<ConnectionManager>;
