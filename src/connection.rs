use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::{Batch, BatchKind};
use crate::client::{DatabaseAdminClient, DatabaseClient};
use crate::command::ClientCommandParser;
use crate::connector::{ClientHandles, Connector};
use crate::context::Context;
use crate::error::SpannerMiddlewareError;
use crate::results::ResultSet;
use crate::retry::AbortRetryPolicy;
use crate::statement::{PreparedStatement, Statement, is_ddl, prepare_statement};
use crate::transaction::{
    ConnectionTransaction, ReadOnlyTransaction, ReadWriteTransaction, TransactionOptions,
};
use crate::values::{CommitTimestamp, Mutation, TimestampBound, Value, validate_params};

/// How a single DML statement executes when no explicit transaction is
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutocommitDmlMode {
    /// Wrap the statement in an internally-managed read-write transaction.
    /// The default.
    #[default]
    Transactional,
    /// Execute as a partitioned, non-atomic bulk update. Suitable for
    /// large-scale updates and deletes that need not be atomic.
    PartitionedNonAtomic,
}

impl fmt::Display for AutocommitDmlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutocommitDmlMode::Transactional => f.write_str("Transactional"),
            AutocommitDmlMode::PartitionedNonAtomic => f.write_str("Partitioned_Non_Atomic"),
        }
    }
}

/// One logical connection to a database.
///
/// A connection holds at most one active transaction XOR one active
/// connection-level batch (a DML batch may additionally nest inside an
/// active read-write transaction). It is owned by a single caller at a
/// time; the pool that hands out connections is responsible for that
/// exclusion, and no internal locking guards the per-connection state.
pub struct Connection {
    connector: Arc<Connector>,
    client: Arc<dyn DatabaseClient>,
    admin_client: Arc<dyn DatabaseAdminClient>,
    command_parser: Arc<dyn ClientCommandParser>,
    database: String,
    closed: bool,
    tx: Option<ConnectionTransaction>,
    batch: Option<Batch>,
    commit_ts: Option<CommitTimestamp>,
    retry_aborts: bool,
    autocommit_dml_mode: AutocommitDmlMode,
    read_only_staleness: TimestampBound,
    retry_policy: AbortRetryPolicy,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("database", &self.database)
            .field("closed", &self.closed)
            .field("retry_aborts", &self.retry_aborts)
            .field("autocommit_dml_mode", &self.autocommit_dml_mode)
            .field("read_only_staleness", &self.read_only_staleness)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        connector: Arc<Connector>,
        handles: ClientHandles,
        database: String,
        command_parser: Arc<dyn ClientCommandParser>,
    ) -> Self {
        let retry_aborts = connector.retry_aborts_internally();
        Self {
            connector,
            client: handles.client,
            admin_client: handles.admin,
            command_parser,
            database,
            closed: false,
            tx: None,
            batch: None,
            commit_ts: None,
            retry_aborts,
            autocommit_dml_mode: AutocommitDmlMode::default(),
            read_only_staleness: TimestampBound::default(),
            retry_policy: AbortRetryPolicy::default(),
        }
    }

    /// Fully qualified name of the database this connection talks to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Validate a statement and return a handle that checks argument counts
    /// before execution.
    ///
    /// # Errors
    /// Returns the bad-connection sentinel on a closed connection.
    pub fn prepare(&self, sql: &str) -> Result<PreparedStatement, SpannerMiddlewareError> {
        self.ensure_open()?;
        Ok(PreparedStatement::new(sql))
    }

    /// Run a query: through a recognized client-side command, the active
    /// transaction, or a single-use snapshot read at the connection's
    /// staleness bound.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for unbindable arguments, the
    /// bad-connection sentinel on a closed connection, and whatever the
    /// backing client reports.
    pub async fn query(
        &mut self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        self.ensure_open()?;
        if let Some(command) = self.command_parser.parse(sql) {
            return command.query(ctx, self, args).await;
        }
        validate_params(args)?;
        self.commit_ts = None;
        let statement = prepare_statement(sql, args)?;
        match &mut self.tx {
            Some(tx) => tx.query(ctx, statement).await,
            None => {
                self.client
                    .single_use_query(ctx, statement, &self.read_only_staleness)
                    .await
            }
        }
    }

    /// Execute a statement and return the number of affected rows (0 for
    /// DDL and for statements buffered into a batch).
    ///
    /// DDL routes to the schema-administration path and is rejected inside
    /// a transaction. DML goes to the active transaction, the open DML
    /// batch, or autocommit execution, in that order.
    ///
    /// # Errors
    /// `FailedPrecondition` for DDL inside a transaction or an active DML
    /// batch, `InvalidArgument` for unbindable arguments, the
    /// bad-connection sentinel on a closed connection.
    pub async fn execute(
        &mut self,
        ctx: &Context,
        sql: &str,
        args: &[Value],
    ) -> Result<i64, SpannerMiddlewareError> {
        self.ensure_open()?;
        if let Some(command) = self.command_parser.parse(sql) {
            return command.execute(ctx, self, args).await;
        }
        validate_params(args)?;
        self.commit_ts = None;
        if is_ddl(sql) {
            if self.tx.is_some() {
                return Err(SpannerMiddlewareError::failed_precondition(
                    "cannot execute DDL as part of a transaction",
                ));
            }
            self.exec_ddl(ctx, vec![Statement::new(sql)]).await?;
            return Ok(0);
        }
        let statement = prepare_statement(sql, args)?;
        match &mut self.tx {
            Some(tx) => tx.execute_update(ctx, statement).await,
            None => {
                if let Some(batch) = self.batch.as_mut().filter(|b| b.kind == BatchKind::Dml) {
                    batch.push(statement);
                    return Ok(0);
                }
                self.execute_autocommit_dml(ctx, statement).await
            }
        }
    }

    async fn execute_autocommit_dml(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<i64, SpannerMiddlewareError> {
        match self.autocommit_dml_mode {
            AutocommitDmlMode::Transactional => {
                let (affected, ts) =
                    exec_single_dml_transactional(&self.client, ctx, statement, &self.retry_policy)
                        .await?;
                self.commit_ts = Some(ts);
                Ok(affected)
            }
            AutocommitDmlMode::PartitionedNonAtomic => {
                self.client.partitioned_update(ctx, statement).await
            }
        }
    }

    /// Submit schema statements, or append them to an open DDL batch.
    async fn exec_ddl(
        &mut self,
        ctx: &Context,
        statements: Vec<Statement>,
    ) -> Result<(), SpannerMiddlewareError> {
        match &mut self.batch {
            Some(batch) if batch.kind == BatchKind::Dml => {
                Err(SpannerMiddlewareError::failed_precondition(
                    "this connection has an active DML batch",
                ))
            }
            Some(batch) => {
                batch.statements.extend(statements);
                Ok(())
            }
            None => {
                if statements.is_empty() {
                    return Ok(());
                }
                let texts: Vec<String> = statements.into_iter().map(|s| s.sql).collect();
                debug!(statements = texts.len(), database = %self.database, "submitting schema change");
                let mut operation = self
                    .admin_client
                    .update_database_ddl(ctx, &self.database, texts)
                    .await?;
                operation.wait(ctx).await
            }
        }
    }

    // ---- batches -------------------------------------------------------

    /// Open a DDL batch. Subsequent DDL statements are buffered until
    /// [`run_batch`](Self::run_batch) submits them as one request. Schema
    /// batches are never allowed inside a transaction and are not atomic.
    ///
    /// # Errors
    /// `FailedPrecondition` when a batch or transaction is already active.
    pub fn start_batch_ddl(&mut self) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        if self.batch.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "this connection already has an active batch",
            ));
        }
        if self.tx.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "this connection has an active transaction; DDL batches in transactions are not supported",
            ));
        }
        self.batch = Some(Batch::ddl());
        Ok(())
    }

    /// Open a DML batch. Inside a read-write transaction this targets the
    /// transaction's own nested batch; a read-only transaction cannot
    /// batch DML.
    ///
    /// # Errors
    /// `FailedPrecondition` when a batch is already active or the active
    /// transaction is read-only.
    pub fn start_batch_dml(&mut self) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        if let Some(tx) = &mut self.tx {
            return tx.start_batch_dml();
        }
        if self.batch.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "this connection already has an active batch",
            ));
        }
        self.batch = Some(Batch::dml());
        Ok(())
    }

    /// Submit the open batch as one request and clear it. A DML batch of
    /// zero statements is a successful no-op returning 0. The returned
    /// count is the summed affected rows of a DML batch; DDL batches
    /// return 0.
    ///
    /// # Errors
    /// `FailedPrecondition` when no batch is active.
    pub async fn run_batch(&mut self, ctx: &Context) -> Result<i64, SpannerMiddlewareError> {
        self.ensure_open()?;
        if let Some(tx) = &mut self.tx {
            return tx.run_batch(ctx).await;
        }
        let batch = self.batch.take().ok_or_else(|| {
            SpannerMiddlewareError::failed_precondition(
                "this connection does not have an active batch",
            )
        })?;
        match batch.kind {
            BatchKind::Ddl => {
                self.exec_ddl(ctx, batch.statements).await?;
                Ok(0)
            }
            BatchKind::Dml => {
                if batch.is_empty() {
                    return Ok(0);
                }
                debug!(statements = batch.len(), "running DML batch");
                exec_batch_dml_transactional(&self.client, ctx, batch.statements, &self.retry_policy)
                    .await
            }
        }
    }

    /// Discard the open batch and its buffered statements. A no-op when no
    /// batch is open.
    ///
    /// # Errors
    /// Returns the bad-connection sentinel on a closed connection.
    pub fn abort_batch(&mut self) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        if let Some(tx) = &mut self.tx {
            tx.abort_batch();
            return Ok(());
        }
        self.batch = None;
        Ok(())
    }

    #[must_use]
    pub fn in_ddl_batch(&self) -> bool {
        matches!(&self.batch, Some(b) if b.kind == BatchKind::Ddl)
    }

    #[must_use]
    pub fn in_dml_batch(&self) -> bool {
        matches!(&self.batch, Some(b) if b.kind == BatchKind::Dml)
            || self.tx.as_ref().is_some_and(ConnectionTransaction::has_dml_batch)
    }

    // ---- transactions --------------------------------------------------

    /// Begin a transaction. Read-only transactions freeze the connection's
    /// current staleness bound; read-write transactions inherit the retry
    /// flag as configured at begin time.
    ///
    /// # Errors
    /// `FailedPrecondition` when a transaction or connection-level batch is
    /// already active.
    pub async fn begin_transaction(
        &mut self,
        ctx: &Context,
        opts: TransactionOptions,
    ) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "already in a transaction",
            ));
        }
        if self.batch.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "this connection has an active batch; run or abort the batch before starting a transaction",
            ));
        }
        if opts.read_only {
            let reader = self
                .client
                .begin_read_only(ctx, &self.read_only_staleness)
                .await?;
            debug!(staleness = ?self.read_only_staleness, "beginning read-only transaction");
            self.tx = Some(ConnectionTransaction::ReadOnly(ReadOnlyTransaction::new(
                reader,
                self.read_only_staleness.clone(),
            )));
        } else {
            let tx = self.client.begin_read_write(ctx).await?;
            debug!(retry_aborts = self.retry_aborts, "beginning read-write transaction");
            self.tx = Some(ConnectionTransaction::ReadWrite(ReadWriteTransaction::new(
                Arc::clone(&self.client),
                tx,
                self.retry_aborts,
                self.retry_policy.clone(),
            )));
            self.commit_ts = None;
        }
        Ok(())
    }

    /// Commit the active transaction. Always returns the connection to the
    /// idle state, even when the commit fails. A read-write commit yields
    /// the commit timestamp and records it on the connection; a read-only
    /// commit yields `None`.
    ///
    /// # Errors
    /// `FailedPrecondition` when no transaction is active; `Aborted` or the
    /// concurrent-modification error per the retry protocol.
    pub async fn commit(
        &mut self,
        ctx: &Context,
    ) -> Result<Option<CommitTimestamp>, SpannerMiddlewareError> {
        self.ensure_open()?;
        let tx = self.tx.take().ok_or_else(|| {
            SpannerMiddlewareError::failed_precondition(
                "this connection does not have an active transaction",
            )
        })?;
        match tx {
            ConnectionTransaction::ReadOnly(mut ro) => {
                ro.close().await?;
                Ok(None)
            }
            ConnectionTransaction::ReadWrite(mut rw) => {
                let ts = rw.commit(ctx).await?;
                debug!(commit_timestamp = %ts, "transaction committed");
                self.commit_ts = Some(ts);
                Ok(Some(ts))
            }
        }
    }

    /// Roll back the active transaction. Always returns the connection to
    /// the idle state and never yields a commit timestamp.
    ///
    /// # Errors
    /// `FailedPrecondition` when no transaction is active.
    pub async fn rollback(&mut self, ctx: &Context) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        let tx = self.tx.take().ok_or_else(|| {
            SpannerMiddlewareError::failed_precondition(
                "this connection does not have an active transaction",
            )
        })?;
        self.commit_ts = None;
        match tx {
            ConnectionTransaction::ReadOnly(mut ro) => ro.close().await,
            ConnectionTransaction::ReadWrite(mut rw) => rw.rollback(ctx).await,
        }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    #[must_use]
    pub fn in_read_only_transaction(&self) -> bool {
        self.tx.as_ref().is_some_and(ConnectionTransaction::is_read_only)
    }

    #[must_use]
    pub fn in_read_write_transaction(&self) -> bool {
        self.tx.as_ref().is_some_and(ConnectionTransaction::is_read_write)
    }

    // ---- session lifecycle ---------------------------------------------

    /// Check that the connection still round-trips to the database: a
    /// trivial query must return the literal 1.
    ///
    /// # Errors
    /// Any failure, including a closed connection, is reported as the
    /// bad-connection sentinel so the owning pool discards the connection.
    pub async fn ping(&mut self, ctx: &Context) -> Result<(), SpannerMiddlewareError> {
        if self.closed {
            return Err(SpannerMiddlewareError::bad_connection("connection is closed"));
        }
        match self.query(ctx, "SELECT 1", &[]).await {
            Ok(rs) => {
                let ok = rs.results.len() == 1
                    && rs.results[0].values.len() == 1
                    && rs.results[0].values[0] == Value::Int64(1);
                if ok {
                    Ok(())
                } else {
                    Err(SpannerMiddlewareError::bad_connection(
                        "ping query returned an unexpected result",
                    ))
                }
            }
            Err(error) => {
                warn!(%error, "ping failed");
                Err(SpannerMiddlewareError::bad_connection("ping query failed"))
            }
        }
    }

    /// Return the connection to its default state before the pool hands it
    /// to another caller: roll back any open transaction, discard any
    /// batch, clear the last commit timestamp, and restore the retry flag,
    /// autocommit DML mode, and staleness defaults.
    ///
    /// # Errors
    /// A failed rollback or a closed connection reports the bad-connection
    /// sentinel.
    pub async fn reset_session(&mut self, ctx: &Context) -> Result<(), SpannerMiddlewareError> {
        if self.closed {
            return Err(SpannerMiddlewareError::bad_connection("connection is closed"));
        }
        if let Some(tx) = self.tx.take() {
            let result = match tx {
                ConnectionTransaction::ReadOnly(mut ro) => ro.close().await,
                ConnectionTransaction::ReadWrite(mut rw) => rw.rollback(ctx).await,
            };
            if let Err(error) = result {
                warn!(%error, "rollback during session reset failed");
                return Err(SpannerMiddlewareError::bad_connection(
                    "failed to roll back the open transaction during session reset",
                ));
            }
        }
        self.commit_ts = None;
        self.batch = None;
        self.retry_aborts = true;
        self.autocommit_dml_mode = AutocommitDmlMode::default();
        self.read_only_staleness = TimestampBound::default();
        Ok(())
    }

    /// Close this connection and drop its reference on the shared
    /// connector. The last connection of a connector tears down the
    /// backing clients and removes the connector from the registry.
    ///
    /// # Errors
    /// Returns the bad-connection sentinel when already closed; teardown
    /// errors from the backing clients propagate.
    pub async fn close(&mut self) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        if let Some(tx) = self.tx.take() {
            let result = match tx {
                ConnectionTransaction::ReadOnly(mut ro) => ro.close().await,
                ConnectionTransaction::ReadWrite(mut rw) => {
                    rw.rollback(&Context::background()).await
                }
            };
            if let Err(error) = result {
                warn!(%error, "rollback during close failed");
            }
        }
        self.batch = None;
        self.closed = true;
        self.connector.release().await
    }

    // ---- extension surface ---------------------------------------------

    /// Whether aborted read-write transactions are retried internally.
    #[must_use]
    pub fn retry_aborts_internally(&self) -> bool {
        self.retry_aborts
    }

    /// Enable or disable the internal retry of aborted transactions. When
    /// disabled, any abort is surfaced to the caller immediately.
    ///
    /// # Errors
    /// `FailedPrecondition` while a transaction is active.
    pub fn set_retry_aborts_internally(
        &mut self,
        retry: bool,
    ) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "cannot change retry mode while a transaction is active",
            ));
        }
        self.retry_aborts = retry;
        Ok(())
    }

    #[must_use]
    pub fn autocommit_dml_mode(&self) -> AutocommitDmlMode {
        self.autocommit_dml_mode
    }

    /// # Errors
    /// Returns the bad-connection sentinel on a closed connection.
    pub fn set_autocommit_dml_mode(
        &mut self,
        mode: AutocommitDmlMode,
    ) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        self.autocommit_dml_mode = mode;
        Ok(())
    }

    /// The staleness bound used for autocommit queries and for read-only
    /// transactions begun after this point.
    #[must_use]
    pub fn read_only_staleness(&self) -> &TimestampBound {
        &self.read_only_staleness
    }

    /// # Errors
    /// `FailedPrecondition` while a transaction is active; an already-open
    /// read-only transaction keeps the bound it was begun with.
    pub fn set_read_only_staleness(
        &mut self,
        staleness: TimestampBound,
    ) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "cannot change the read-only staleness while a transaction is active",
            ));
        }
        self.read_only_staleness = staleness;
        Ok(())
    }

    /// Commit timestamp of the last read-write transaction (explicit or
    /// autocommit) that committed successfully on this connection.
    ///
    /// # Errors
    /// `FailedPrecondition` when no such transaction has committed.
    pub fn commit_timestamp(&self) -> Result<CommitTimestamp, SpannerMiddlewareError> {
        self.ensure_open()?;
        self.commit_ts.ok_or_else(|| {
            SpannerMiddlewareError::failed_precondition(
                "this connection has not executed a read/write transaction that committed successfully",
            )
        })
    }

    /// Apply mutations in a single write outside a transaction.
    ///
    /// # Errors
    /// `FailedPrecondition` while a transaction is active; use
    /// [`buffer_write`](Self::buffer_write) inside one.
    pub async fn apply(
        &mut self,
        ctx: &Context,
        mutations: Vec<Mutation>,
    ) -> Result<CommitTimestamp, SpannerMiddlewareError> {
        self.ensure_open()?;
        if self.tx.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "apply may not be called while the connection is in a transaction; use buffer_write instead",
            ));
        }
        self.client.apply(ctx, mutations).await
    }

    /// Buffer mutations into the active read-write transaction's write
    /// set.
    ///
    /// # Errors
    /// `FailedPrecondition` outside a read-write transaction; use
    /// [`apply`](Self::apply) outside one.
    pub fn buffer_write(
        &mut self,
        mutations: Vec<Mutation>,
    ) -> Result<(), SpannerMiddlewareError> {
        self.ensure_open()?;
        match &mut self.tx {
            Some(tx) => tx.buffer_write(mutations),
            None => Err(SpannerMiddlewareError::failed_precondition(
                "buffer_write may only be called while the connection is in a transaction; use apply outside a transaction",
            )),
        }
    }

    fn ensure_open(&self) -> Result<(), SpannerMiddlewareError> {
        if self.closed {
            Err(SpannerMiddlewareError::bad_connection("connection is closed"))
        } else {
            Ok(())
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            Arc::clone(&self.connector).release_detached();
        }
    }
}

impl PreparedStatement {
    /// Run the prepared query through the owning connection's normal
    /// dispatch.
    ///
    /// # Errors
    /// `InvalidArgument` when the argument count is wrong, plus anything
    /// [`Connection::query`] can return.
    pub async fn query(
        &self,
        ctx: &Context,
        conn: &mut Connection,
        args: &[Value],
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        self.check_args(args)?;
        conn.query(ctx, self.sql(), args).await
    }

    /// Execute the prepared statement through the owning connection's
    /// normal dispatch.
    ///
    /// # Errors
    /// `InvalidArgument` when the argument count is wrong, plus anything
    /// [`Connection::execute`] can return.
    pub async fn execute(
        &self,
        ctx: &Context,
        conn: &mut Connection,
        args: &[Value],
    ) -> Result<i64, SpannerMiddlewareError> {
        self.check_args(args)?;
        conn.execute(ctx, self.sql(), args).await
    }
}

/// Execute one DML statement in a new internally-managed read-write
/// transaction, retrying bounded on abort. Returns the affected count and
/// the commit timestamp.
async fn exec_single_dml_transactional(
    client: &Arc<dyn DatabaseClient>,
    ctx: &Context,
    statement: Statement,
    policy: &AbortRetryPolicy,
) -> Result<(i64, CommitTimestamp), SpannerMiddlewareError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut tx = client.begin_read_write(ctx).await?;
        let affected = match tx.update(ctx, statement.clone()).await {
            Ok(n) => n,
            Err(e) if e.is_aborted() && attempt < policy.max_attempts => {
                policy.backoff(attempt, ctx).await?;
                continue;
            }
            Err(e) => {
                if !e.is_aborted() {
                    let _ = tx.rollback(ctx).await;
                }
                return Err(e);
            }
        };
        match tx.commit(ctx).await {
            Ok(ts) => return Ok((affected, ts)),
            Err(e) if e.is_aborted() && attempt < policy.max_attempts => {
                policy.backoff(attempt, ctx).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Execute a standalone DML batch atomically in a new internally-managed
/// read-write transaction and return the summed affected-row count.
async fn exec_batch_dml_transactional(
    client: &Arc<dyn DatabaseClient>,
    ctx: &Context,
    statements: Vec<Statement>,
    policy: &AbortRetryPolicy,
) -> Result<i64, SpannerMiddlewareError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut tx = client.begin_read_write(ctx).await?;
        let counts = match tx.batch_update(ctx, statements.clone()).await {
            Ok(counts) => counts,
            Err(e) if e.is_aborted() && attempt < policy.max_attempts => {
                policy.backoff(attempt, ctx).await?;
                continue;
            }
            Err(e) => {
                if !e.is_aborted() {
                    let _ = tx.rollback(ctx).await;
                }
                return Err(e);
            }
        };
        match tx.commit(ctx).await {
            Ok(_) => return Ok(counts.iter().sum()),
            Err(e) if e.is_aborted() && attempt < policy.max_attempts => {
                policy.backoff(attempt, ctx).await?;
            }
            Err(e) => return Err(e),
        }
    }
}
