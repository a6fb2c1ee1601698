use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::Batch;
use crate::client::{DatabaseClient, ReadContext, TransactionContext};
use crate::context::Context;
use crate::error::SpannerMiddlewareError;
use crate::results::ResultSet;
use crate::retry::AbortRetryPolicy;
use crate::statement::Statement;
use crate::values::{CommitTimestamp, Mutation, TimestampBound};

/// Options for beginning a transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOptions {
    /// Begin a read-only snapshot transaction instead of a read-write one.
    pub read_only: bool,
}

impl TransactionOptions {
    #[must_use]
    pub fn read_only() -> Self {
        Self { read_only: true }
    }

    #[must_use]
    pub fn read_write() -> Self {
        Self { read_only: false }
    }
}

/// The transaction a connection currently holds: exactly one of the two
/// variants. Operations illegal for a variant (DML on a read-only
/// transaction, for example) fail with `FailedPrecondition`.
pub enum ConnectionTransaction {
    ReadOnly(ReadOnlyTransaction),
    ReadWrite(ReadWriteTransaction),
}

impl ConnectionTransaction {
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, ConnectionTransaction::ReadOnly(_))
    }

    #[must_use]
    pub fn is_read_write(&self) -> bool {
        matches!(self, ConnectionTransaction::ReadWrite(_))
    }

    pub(crate) async fn query(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        match self {
            ConnectionTransaction::ReadOnly(ro) => ro.query(ctx, statement).await,
            ConnectionTransaction::ReadWrite(rw) => rw.query(ctx, statement).await,
        }
    }

    pub(crate) async fn execute_update(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<i64, SpannerMiddlewareError> {
        match self {
            ConnectionTransaction::ReadOnly(_) => Err(SpannerMiddlewareError::failed_precondition(
                "read-only transactions cannot execute DML statements",
            )),
            ConnectionTransaction::ReadWrite(rw) => rw.execute_update(ctx, statement).await,
        }
    }

    pub(crate) fn buffer_write(
        &mut self,
        mutations: Vec<Mutation>,
    ) -> Result<(), SpannerMiddlewareError> {
        match self {
            ConnectionTransaction::ReadOnly(_) => Err(SpannerMiddlewareError::failed_precondition(
                "read-only transactions cannot buffer mutations",
            )),
            ConnectionTransaction::ReadWrite(rw) => rw.buffer_write(mutations),
        }
    }

    pub(crate) fn start_batch_dml(&mut self) -> Result<(), SpannerMiddlewareError> {
        match self {
            ConnectionTransaction::ReadOnly(_) => Err(SpannerMiddlewareError::failed_precondition(
                "read-only transactions cannot execute DML batches",
            )),
            ConnectionTransaction::ReadWrite(rw) => rw.start_batch_dml(),
        }
    }

    pub(crate) async fn run_batch(
        &mut self,
        ctx: &Context,
    ) -> Result<i64, SpannerMiddlewareError> {
        match self {
            ConnectionTransaction::ReadOnly(_) => Err(SpannerMiddlewareError::failed_precondition(
                "this transaction does not have an active batch",
            )),
            ConnectionTransaction::ReadWrite(rw) => rw.run_batch(ctx).await,
        }
    }

    pub(crate) fn abort_batch(&mut self) {
        if let ConnectionTransaction::ReadWrite(rw) = self {
            rw.abort_batch();
        }
    }

    pub(crate) fn has_dml_batch(&self) -> bool {
        matches!(self, ConnectionTransaction::ReadWrite(rw) if rw.batch.is_some())
    }
}

/// A snapshot transaction. The staleness bound is frozen when the
/// transaction begins; later changes on the connection do not affect it.
pub struct ReadOnlyTransaction {
    reader: Box<dyn ReadContext>,
    staleness: TimestampBound,
}

impl ReadOnlyTransaction {
    pub(crate) fn new(reader: Box<dyn ReadContext>, staleness: TimestampBound) -> Self {
        Self { reader, staleness }
    }

    /// The bound this transaction reads at.
    #[must_use]
    pub fn staleness(&self) -> &TimestampBound {
        &self.staleness
    }

    pub(crate) async fn query(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        self.reader.query(ctx, statement).await
    }

    /// Release the snapshot; commit and rollback of a read-only
    /// transaction both end here and neither yields a commit timestamp.
    pub(crate) async fn close(&mut self) -> Result<(), SpannerMiddlewareError> {
        self.reader.close().await
    }
}

/// One statement issued within the current transaction attempt, together
/// with its observed outcome, recorded so an aborted attempt can be
/// replayed and verified statement by statement.
#[derive(Clone)]
enum RetriableStatement {
    Query {
        statement: Statement,
        outcome: Result<ResultSet, SpannerMiddlewareError>,
    },
    Update {
        statement: Statement,
        outcome: Result<i64, SpannerMiddlewareError>,
    },
    BatchUpdate {
        statements: Vec<Statement>,
        outcome: Result<Vec<i64>, SpannerMiddlewareError>,
    },
    BufferWrite {
        mutations: Vec<Mutation>,
    },
}

/// A stateful read-write transaction with the abort-retry protocol.
///
/// Every statement is recorded in an append-only log. When the backing
/// database reports an abort, the log is re-executed in original order on a
/// fresh transaction context; a replayed statement whose outcome differs
/// from the recorded one terminates the transaction with the distinguished
/// concurrent-modification error instead of retrying further.
pub struct ReadWriteTransaction {
    client: Arc<dyn DatabaseClient>,
    tx: Box<dyn TransactionContext>,
    statements: Vec<RetriableStatement>,
    batch: Option<Batch>,
    retry_aborts: bool,
    policy: AbortRetryPolicy,
}

impl ReadWriteTransaction {
    pub(crate) fn new(
        client: Arc<dyn DatabaseClient>,
        tx: Box<dyn TransactionContext>,
        retry_aborts: bool,
        policy: AbortRetryPolicy,
    ) -> Self {
        Self {
            client,
            tx,
            statements: Vec::new(),
            batch: None,
            retry_aborts,
            policy,
        }
    }

    pub(crate) async fn query(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        let mut attempt = 0u32;
        let outcome = loop {
            match self.tx.query(ctx, statement.clone()).await {
                Err(e) if e.is_aborted() && self.retry_aborts => {
                    self.retry_after_abort(ctx, &mut attempt).await?;
                }
                other => break other,
            }
        };
        self.record(RetriableStatement::Query {
            statement,
            outcome: outcome.clone(),
        });
        outcome
    }

    pub(crate) async fn execute_update(
        &mut self,
        ctx: &Context,
        statement: Statement,
    ) -> Result<i64, SpannerMiddlewareError> {
        if let Some(batch) = &mut self.batch {
            batch.push(statement);
            return Ok(0);
        }
        let mut attempt = 0u32;
        let outcome = loop {
            match self.tx.update(ctx, statement.clone()).await {
                Err(e) if e.is_aborted() && self.retry_aborts => {
                    self.retry_after_abort(ctx, &mut attempt).await?;
                }
                other => break other,
            }
        };
        self.record(RetriableStatement::Update {
            statement,
            outcome: outcome.clone(),
        });
        outcome
    }

    pub(crate) fn buffer_write(
        &mut self,
        mutations: Vec<Mutation>,
    ) -> Result<(), SpannerMiddlewareError> {
        self.tx.buffer_write(mutations.clone())?;
        self.statements
            .push(RetriableStatement::BufferWrite { mutations });
        Ok(())
    }

    pub(crate) fn start_batch_dml(&mut self) -> Result<(), SpannerMiddlewareError> {
        if self.batch.is_some() {
            return Err(SpannerMiddlewareError::failed_precondition(
                "this transaction already has an active DML batch",
            ));
        }
        self.batch = Some(Batch::dml());
        Ok(())
    }

    pub(crate) async fn run_batch(
        &mut self,
        ctx: &Context,
    ) -> Result<i64, SpannerMiddlewareError> {
        let batch = self.batch.take().ok_or_else(|| {
            SpannerMiddlewareError::failed_precondition(
                "this transaction does not have an active batch",
            )
        })?;
        if batch.is_empty() {
            return Ok(0);
        }
        let statements = batch.statements;
        debug!(statements = statements.len(), "running transaction-scoped DML batch");
        let mut attempt = 0u32;
        let outcome = loop {
            match self.tx.batch_update(ctx, statements.clone()).await {
                Err(e) if e.is_aborted() && self.retry_aborts => {
                    self.retry_after_abort(ctx, &mut attempt).await?;
                }
                other => break other,
            }
        };
        self.record(RetriableStatement::BatchUpdate {
            statements,
            outcome: outcome.clone(),
        });
        outcome.map(|counts| counts.iter().sum())
    }

    pub(crate) fn abort_batch(&mut self) {
        self.batch = None;
    }

    pub(crate) async fn commit(
        &mut self,
        ctx: &Context,
    ) -> Result<CommitTimestamp, SpannerMiddlewareError> {
        let mut attempt = 0u32;
        loop {
            match self.tx.commit(ctx).await {
                Err(e) if e.is_aborted() && self.retry_aborts => {
                    self.retry_after_abort(ctx, &mut attempt).await?;
                }
                outcome => return outcome,
            }
        }
    }

    pub(crate) async fn rollback(&mut self, ctx: &Context) -> Result<(), SpannerMiddlewareError> {
        self.tx.rollback(ctx).await
    }

    /// Keep the replay log out of terminal abort states: a statement whose
    /// outcome is the abort itself is not recorded (the transaction is dead
    /// either way).
    fn record(&mut self, statement: RetriableStatement) {
        let aborted = match &statement {
            RetriableStatement::Query { outcome, .. } => {
                matches!(outcome, Err(e) if e.is_aborted())
            }
            RetriableStatement::Update { outcome, .. } => {
                matches!(outcome, Err(e) if e.is_aborted())
            }
            RetriableStatement::BatchUpdate { outcome, .. } => {
                matches!(outcome, Err(e) if e.is_aborted())
            }
            RetriableStatement::BufferWrite { .. } => false,
        };
        if !aborted {
            self.statements.push(statement);
        }
    }

    /// Restart the transaction on a fresh context and replay the log,
    /// bounded by the retry policy. Returns once a replay attempt matched
    /// every recorded outcome; the caller then re-issues the operation that
    /// observed the abort. The attempt counter spans the whole operation so
    /// an operation that keeps aborting after successful replays stays
    /// bounded too.
    async fn retry_after_abort(
        &mut self,
        ctx: &Context,
        attempt: &mut u32,
    ) -> Result<(), SpannerMiddlewareError> {
        loop {
            *attempt += 1;
            if *attempt > self.policy.max_attempts {
                warn!(
                    attempts = self.policy.max_attempts,
                    "giving up on aborted transaction after exhausting retries"
                );
                return Err(SpannerMiddlewareError::Aborted(format!(
                    "transaction still aborted after {} retry attempts",
                    self.policy.max_attempts
                )));
            }
            self.policy.backoff(*attempt, ctx).await?;
            debug!(
                attempt = *attempt,
                statements = self.statements.len(),
                "replaying aborted transaction on a fresh context"
            );
            self.tx = self.client.begin_read_write(ctx).await?;
            match self.replay(ctx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_aborted() => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn replay(&mut self, ctx: &Context) -> Result<(), SpannerMiddlewareError> {
        for idx in 0..self.statements.len() {
            ctx.ensure_active()?;
            match self.statements[idx].clone() {
                RetriableStatement::Query { statement, outcome } => {
                    let replayed = self.tx.query(ctx, statement).await;
                    check_replay(&outcome, &replayed)?;
                }
                RetriableStatement::Update { statement, outcome } => {
                    let replayed = self.tx.update(ctx, statement).await;
                    check_replay(&outcome, &replayed)?;
                }
                RetriableStatement::BatchUpdate { statements, outcome } => {
                    let replayed = self.tx.batch_update(ctx, statements).await;
                    check_replay(&outcome, &replayed)?;
                }
                RetriableStatement::BufferWrite { mutations } => {
                    self.tx.buffer_write(mutations)?;
                }
            }
        }
        Ok(())
    }
}

/// A replayed statement is equivalent only when its outcome is identical to
/// the recorded one: row-for-row, column-for-column equal results for
/// queries, exact affected counts for updates, and an identical error for
/// statements that originally failed. A renewed abort restarts the retry
/// loop; any other difference is a concurrent modification.
fn check_replay<T: PartialEq>(
    original: &Result<T, SpannerMiddlewareError>,
    replayed: &Result<T, SpannerMiddlewareError>,
) -> Result<(), SpannerMiddlewareError> {
    if let Err(e) = replayed {
        if e.is_aborted() {
            return Err(e.clone());
        }
    }
    if original == replayed {
        Ok(())
    } else {
        Err(SpannerMiddlewareError::AbortedDueToConcurrentModification)
    }
}
