//! Client-side connection and transaction middleware for a Spanner-style
//! distributed relational database.
//!
//! The crate presents one logical [`Connection`] backed by autocommit
//! execution, a read-only snapshot transaction, or a read-write transaction
//! with automatic abort-retry, plus two independent statement-batching
//! modes (schema-change batches and data-manipulation batches). The
//! underlying RPC clients, the SQL dialect, and the client-side command
//! interpreter are external collaborators reached through the traits in
//! [`client`] and [`command`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spanner_middleware::prelude::*;
//!
//! # async fn demo(factory: Arc<dyn ClientFactory>) -> Result<(), SpannerMiddlewareError> {
//! let driver = Driver::new(factory);
//! let ctx = Context::background();
//! let mut conn = driver
//!     .open(&ctx, "projects/p/instances/i/databases/d")
//!     .await?;
//!
//! conn.begin_transaction(&ctx, TransactionOptions::read_write()).await?;
//! conn.execute(&ctx, "UPDATE t SET v=@v WHERE id=@id",
//!     &[Value::String("x".into()), Value::Int64(1)]).await?;
//! let commit_ts = conn.commit(&ctx).await?;
//! # let _ = commit_ts;
//! conn.close().await?;
//! # Ok(()) }
//! ```
//!
//! [`Connection`]: connection::Connection

pub mod batch;
pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod connector;
pub mod context;
pub mod error;
pub mod pool;
pub mod prelude;
pub mod results;
pub mod retry;
pub mod statement;
pub mod transaction;
pub mod values;

pub use connection::{AutocommitDmlMode, Connection};
pub use connector::Driver;
pub use context::Context;
pub use error::SpannerMiddlewareError;
pub use results::{DbRow, ResultSet};
pub use statement::Statement;
pub use transaction::TransactionOptions;
pub use values::{CommitTimestamp, Mutation, TimestampBound, Value};
