//! Narrow interfaces to the backing database clients.
//!
//! The middleware never talks to the wire itself: queries, mutations, and
//! schema changes all go through these traits, and client construction goes
//! through [`ClientFactory`]. Production code plugs in an RPC-backed
//! implementation; tests plug in in-memory fakes.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{ClientOptions, SessionPoolConfig};
use crate::context::Context;
use crate::error::SpannerMiddlewareError;
use crate::results::ResultSet;
use crate::statement::Statement;
use crate::values::{CommitTimestamp, Mutation, TimestampBound};

/// The backing query/mutation client for one database.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Run a query as a single, isolated snapshot read at the given
    /// staleness bound.
    async fn single_use_query(
        &self,
        ctx: &Context,
        statement: Statement,
        bound: &TimestampBound,
    ) -> Result<ResultSet, SpannerMiddlewareError>;

    /// Begin a snapshot read context pinned to one staleness bound. Every
    /// query through the returned context observes the same snapshot.
    async fn begin_read_only(
        &self,
        ctx: &Context,
        bound: &TimestampBound,
    ) -> Result<Box<dyn ReadContext>, SpannerMiddlewareError>;

    /// Begin a stateful read-write transaction.
    async fn begin_read_write(
        &self,
        ctx: &Context,
    ) -> Result<Box<dyn TransactionContext>, SpannerMiddlewareError>;

    /// Execute a DML statement as a partitioned, non-atomic bulk update and
    /// return a lower bound on the number of affected rows.
    async fn partitioned_update(
        &self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<i64, SpannerMiddlewareError>;

    /// Apply mutations in a single write outside any transaction.
    async fn apply(
        &self,
        ctx: &Context,
        mutations: Vec<Mutation>,
    ) -> Result<CommitTimestamp, SpannerMiddlewareError>;

    /// Release network resources. Called once, by the last connection of
    /// the owning connector.
    async fn close(&self) -> Result<(), SpannerMiddlewareError>;
}

/// A snapshot read context backing a read-only transaction.
#[async_trait]
pub trait ReadContext: Send {
    async fn query(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<ResultSet, SpannerMiddlewareError>;

    /// Release the snapshot. Read-only transactions have nothing to commit
    /// or roll back; both terminal operations end here.
    async fn close(&mut self) -> Result<(), SpannerMiddlewareError>;
}

/// A stateful read-write transaction on the backing database.
///
/// Any method may fail with `Aborted` when a concurrent commit invalidates
/// this transaction's read/write set; the middleware owns the replay
/// protocol and will request a fresh context from the client.
#[async_trait]
pub trait TransactionContext: Send {
    async fn query(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<ResultSet, SpannerMiddlewareError>;

    async fn update(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<i64, SpannerMiddlewareError>;

    /// Execute several DML statements in one request, returning the
    /// per-statement affected-row counts in order.
    async fn batch_update(
        &mut self,
        ctx: &Context,
        statements: Vec<Statement>,
    ) -> Result<Vec<i64>, SpannerMiddlewareError>;

    /// Buffer mutations into this transaction's write set.
    fn buffer_write(&mut self, mutations: Vec<Mutation>) -> Result<(), SpannerMiddlewareError>;

    async fn commit(&mut self, ctx: &Context)
    -> Result<CommitTimestamp, SpannerMiddlewareError>;

    async fn rollback(&mut self, ctx: &Context) -> Result<(), SpannerMiddlewareError>;
}

/// The schema-administration client.
#[async_trait]
pub trait DatabaseAdminClient: Send + Sync {
    /// Submit one request carrying all DDL statement texts. The returned
    /// operation completes asynchronously on the server; callers must wait
    /// on it before assuming the schema change is visible.
    async fn update_database_ddl(
        &self,
        ctx: &Context,
        database: &str,
        statements: Vec<String>,
    ) -> Result<Box<dyn UpdateDdlOperation>, SpannerMiddlewareError>;

    async fn close(&self) -> Result<(), SpannerMiddlewareError>;
}

/// Handle to a long-running schema change.
#[async_trait]
pub trait UpdateDdlOperation: Send {
    /// Block until the schema change finishes. Statements may have been
    /// applied partially when this returns an error; schema batches are
    /// not atomic.
    async fn wait(&mut self, ctx: &Context) -> Result<(), SpannerMiddlewareError>;
}

/// Builds the two client handles for a connector. Invoked at most once per
/// connector, however many connections race to be first.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create_client(
        &self,
        ctx: &Context,
        database: &str,
        options: &ClientOptions,
        pool: &SessionPoolConfig,
    ) -> Result<Arc<dyn DatabaseClient>, SpannerMiddlewareError>;

    async fn create_admin_client(
        &self,
        ctx: &Context,
        options: &ClientOptions,
    ) -> Result<Arc<dyn DatabaseAdminClient>, SpannerMiddlewareError>;
}
