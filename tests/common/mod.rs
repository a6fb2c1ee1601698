//! Shared in-memory fakes for the backing clients.
//!
//! The fakes are scriptable: tests can preload query results, change them
//! mid-test (to provoke replay mismatches), inject aborts before updates or
//! commits, and inspect a call log afterwards.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::DateTime;

use spanner_middleware::client::{
    ClientFactory, DatabaseAdminClient, DatabaseClient, ReadContext, TransactionContext,
    UpdateDdlOperation,
};
use spanner_middleware::config::{ClientOptions, SessionPoolConfig};
use spanner_middleware::context::Context;
use spanner_middleware::error::SpannerMiddlewareError;
use spanner_middleware::results::ResultSet;
use spanner_middleware::statement::Statement;
use spanner_middleware::values::{CommitTimestamp, Mutation, TimestampBound, Value};

/// Build a one-row, one-column result set holding a single integer.
pub fn int_result(v: i64) -> ResultSet {
    ResultSet::from_rows(vec!["c".to_string()], vec![vec![Value::Int64(v)]])
}

/// Build a result set from column names and rows.
pub fn rows(columns: &[&str], data: Vec<Vec<Value>>) -> ResultSet {
    ResultSet::from_rows(columns.iter().map(|c| (*c).to_string()).collect(), data)
}

#[derive(Default)]
struct BackendState {
    query_results: HashMap<String, ResultSet>,
    update_counts: HashMap<String, i64>,
    update_errors: HashMap<String, SpannerMiddlewareError>,
    aborts_before_update: u32,
    aborts_before_commit: u32,
    fail_queries: Option<SpannerMiddlewareError>,
    log: Vec<String>,
    ddl_requests: Vec<(String, Vec<String>)>,
    applied_mutations: Vec<Vec<Mutation>>,
    partitioned_statements: Vec<String>,
    single_use_bounds: Vec<TimestampBound>,
    read_only_bounds: Vec<TimestampBound>,
    commit_sequence: i64,
    client_closes: usize,
    admin_closes: usize,
}

/// The scriptable backing database shared by every fake handle.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_query_result(&self, sql: &str, result: ResultSet) {
        self.lock().query_results.insert(sql.to_string(), result);
    }

    pub fn set_update_count(&self, sql: &str, count: i64) {
        self.lock().update_counts.insert(sql.to_string(), count);
    }

    pub fn fail_update_with(&self, sql: &str, error: SpannerMiddlewareError) {
        self.lock().update_errors.insert(sql.to_string(), error);
    }

    /// The next `n` transactional updates fail with `Aborted`.
    pub fn abort_next_updates(&self, n: u32) {
        self.lock().aborts_before_update = n;
    }

    /// The next `n` commits fail with `Aborted`.
    pub fn abort_next_commits(&self, n: u32) {
        self.lock().aborts_before_commit = n;
    }

    pub fn fail_queries_with(&self, error: SpannerMiddlewareError) {
        self.lock().fail_queries = Some(error);
    }

    pub fn clear_query_failures(&self) {
        self.lock().fail_queries = None;
    }

    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn ddl_requests(&self) -> Vec<(String, Vec<String>)> {
        self.lock().ddl_requests.clone()
    }

    pub fn applied_mutations(&self) -> Vec<Vec<Mutation>> {
        self.lock().applied_mutations.clone()
    }

    pub fn partitioned_statements(&self) -> Vec<String> {
        self.lock().partitioned_statements.clone()
    }

    pub fn single_use_bounds(&self) -> Vec<TimestampBound> {
        self.lock().single_use_bounds.clone()
    }

    pub fn read_only_bounds(&self) -> Vec<TimestampBound> {
        self.lock().read_only_bounds.clone()
    }

    pub fn client_closes(&self) -> usize {
        self.lock().client_closes
    }

    pub fn admin_closes(&self) -> usize {
        self.lock().admin_closes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().expect("fake backend state poisoned")
    }

    fn record(&self, entry: impl Into<String>) {
        self.lock().log.push(entry.into());
    }

    fn next_commit_timestamp(&self) -> CommitTimestamp {
        let mut state = self.lock();
        state.commit_sequence += 1;
        DateTime::from_timestamp(1_700_000_000 + state.commit_sequence, 0)
            .expect("valid timestamp")
    }

    fn query(&self, sql: &str) -> Result<ResultSet, SpannerMiddlewareError> {
        let state = self.lock();
        if let Some(error) = &state.fail_queries {
            return Err(error.clone());
        }
        if let Some(result) = state.query_results.get(sql) {
            return Ok(result.clone());
        }
        if sql == "SELECT 1" {
            return Ok(int_result(1));
        }
        Ok(ResultSet::default())
    }

    fn update(&self, sql: &str) -> Result<i64, SpannerMiddlewareError> {
        let mut state = self.lock();
        if state.aborts_before_update > 0 {
            state.aborts_before_update -= 1;
            return Err(SpannerMiddlewareError::Aborted(
                "update aborted by concurrent transaction".into(),
            ));
        }
        if let Some(error) = state.update_errors.get(sql) {
            return Err(error.clone());
        }
        Ok(state.update_counts.get(sql).copied().unwrap_or(1))
    }

    fn commit(&self) -> Result<CommitTimestamp, SpannerMiddlewareError> {
        {
            let mut state = self.lock();
            if state.aborts_before_commit > 0 {
                state.aborts_before_commit -= 1;
                return Err(SpannerMiddlewareError::Aborted(
                    "commit aborted by concurrent transaction".into(),
                ));
            }
        }
        Ok(self.next_commit_timestamp())
    }
}

pub struct FakeDatabaseClient {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl DatabaseClient for FakeDatabaseClient {
    async fn single_use_query(
        &self,
        _ctx: &Context,
        statement: Statement,
        bound: &TimestampBound,
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        self.backend.record(format!("single_use_query: {}", statement.sql));
        self.backend.lock().single_use_bounds.push(bound.clone());
        self.backend.query(&statement.sql)
    }

    async fn begin_read_only(
        &self,
        _ctx: &Context,
        bound: &TimestampBound,
    ) -> Result<Box<dyn ReadContext>, SpannerMiddlewareError> {
        self.backend.record("begin_read_only");
        self.backend.lock().read_only_bounds.push(bound.clone());
        Ok(Box::new(FakeReadContext {
            backend: Arc::clone(&self.backend),
        }))
    }

    async fn begin_read_write(
        &self,
        _ctx: &Context,
    ) -> Result<Box<dyn TransactionContext>, SpannerMiddlewareError> {
        self.backend.record("begin_read_write");
        Ok(Box::new(FakeTransactionContext {
            backend: Arc::clone(&self.backend),
            buffered: Vec::new(),
        }))
    }

    async fn partitioned_update(
        &self,
        _ctx: &Context,
        statement: Statement,
    ) -> Result<i64, SpannerMiddlewareError> {
        self.backend.record(format!("partitioned_update: {}", statement.sql));
        let count = {
            let state = self.backend.lock();
            state.update_counts.get(&statement.sql).copied().unwrap_or(1)
        };
        self.backend.lock().partitioned_statements.push(statement.sql);
        Ok(count)
    }

    async fn apply(
        &self,
        _ctx: &Context,
        mutations: Vec<Mutation>,
    ) -> Result<CommitTimestamp, SpannerMiddlewareError> {
        self.backend.record(format!("apply: {} mutations", mutations.len()));
        self.backend.lock().applied_mutations.push(mutations);
        Ok(self.backend.next_commit_timestamp())
    }

    async fn close(&self) -> Result<(), SpannerMiddlewareError> {
        self.backend.record("client closed");
        self.backend.lock().client_closes += 1;
        Ok(())
    }
}

pub struct FakeReadContext {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl ReadContext for FakeReadContext {
    async fn query(
        &mut self,
        _ctx: &Context,
        statement: Statement,
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        self.backend.record(format!("ro_query: {}", statement.sql));
        self.backend.query(&statement.sql)
    }

    async fn close(&mut self) -> Result<(), SpannerMiddlewareError> {
        self.backend.record("ro_close");
        Ok(())
    }
}

pub struct FakeTransactionContext {
    backend: Arc<FakeBackend>,
    buffered: Vec<Mutation>,
}

#[async_trait]
impl TransactionContext for FakeTransactionContext {
    async fn query(
        &mut self,
        _ctx: &Context,
        statement: Statement,
    ) -> Result<ResultSet, SpannerMiddlewareError> {
        self.backend.record(format!("tx_query: {}", statement.sql));
        self.backend.query(&statement.sql)
    }

    async fn update(
        &mut self,
        _ctx: &Context,
        statement: Statement,
    ) -> Result<i64, SpannerMiddlewareError> {
        self.backend.record(format!("tx_update: {}", statement.sql));
        self.backend.update(&statement.sql)
    }

    async fn batch_update(
        &mut self,
        _ctx: &Context,
        statements: Vec<Statement>,
    ) -> Result<Vec<i64>, SpannerMiddlewareError> {
        self.backend
            .record(format!("tx_batch_update: {} statements", statements.len()));
        statements
            .iter()
            .map(|s| self.backend.update(&s.sql))
            .collect()
    }

    fn buffer_write(&mut self, mutations: Vec<Mutation>) -> Result<(), SpannerMiddlewareError> {
        self.backend
            .record(format!("tx_buffer_write: {} mutations", mutations.len()));
        self.buffered.extend(mutations);
        Ok(())
    }

    async fn commit(
        &mut self,
        _ctx: &Context,
    ) -> Result<CommitTimestamp, SpannerMiddlewareError> {
        let result = self.backend.commit();
        match &result {
            Ok(_) => self.backend.record("tx_commit"),
            Err(_) => self.backend.record("tx_commit: aborted"),
        }
        result
    }

    async fn rollback(&mut self, _ctx: &Context) -> Result<(), SpannerMiddlewareError> {
        self.backend.record("tx_rollback");
        Ok(())
    }
}

pub struct FakeAdminClient {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl DatabaseAdminClient for FakeAdminClient {
    async fn update_database_ddl(
        &self,
        _ctx: &Context,
        database: &str,
        statements: Vec<String>,
    ) -> Result<Box<dyn UpdateDdlOperation>, SpannerMiddlewareError> {
        self.backend
            .record(format!("update_database_ddl: {} statements", statements.len()));
        self.backend
            .lock()
            .ddl_requests
            .push((database.to_string(), statements));
        Ok(Box::new(FakeOperation))
    }

    async fn close(&self) -> Result<(), SpannerMiddlewareError> {
        self.backend.record("admin closed");
        self.backend.lock().admin_closes += 1;
        Ok(())
    }
}

pub struct FakeOperation;

#[async_trait]
impl UpdateDdlOperation for FakeOperation {
    async fn wait(&mut self, _ctx: &Context) -> Result<(), SpannerMiddlewareError> {
        Ok(())
    }
}

/// Factory handing out fake clients over one shared backend.
pub struct FakeClientFactory {
    pub backend: Arc<FakeBackend>,
    clients_created: AtomicUsize,
    admin_clients_created: AtomicUsize,
    fail_init_with: Mutex<Option<SpannerMiddlewareError>>,
    last_client_options: Mutex<Option<ClientOptions>>,
    last_pool_config: Mutex<Option<SessionPoolConfig>>,
}

impl FakeClientFactory {
    pub fn new() -> Arc<Self> {
        Self::with_backend(FakeBackend::new())
    }

    pub fn with_backend(backend: Arc<FakeBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            clients_created: AtomicUsize::new(0),
            admin_clients_created: AtomicUsize::new(0),
            fail_init_with: Mutex::new(None),
            last_client_options: Mutex::new(None),
            last_pool_config: Mutex::new(None),
        })
    }

    pub fn fail_initialization_with(&self, error: SpannerMiddlewareError) {
        *self.fail_init_with.lock().expect("factory state poisoned") = Some(error);
    }

    pub fn clear_initialization_failure(&self) {
        *self.fail_init_with.lock().expect("factory state poisoned") = None;
    }

    pub fn clients_created(&self) -> usize {
        self.clients_created.load(Ordering::SeqCst)
    }

    pub fn admin_clients_created(&self) -> usize {
        self.admin_clients_created.load(Ordering::SeqCst)
    }

    pub fn last_client_options(&self) -> Option<ClientOptions> {
        self.last_client_options
            .lock()
            .expect("factory state poisoned")
            .clone()
    }

    pub fn last_pool_config(&self) -> Option<SessionPoolConfig> {
        self.last_pool_config
            .lock()
            .expect("factory state poisoned")
            .clone()
    }
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn create_client(
        &self,
        _ctx: &Context,
        _database: &str,
        options: &ClientOptions,
        pool: &SessionPoolConfig,
    ) -> Result<Arc<dyn DatabaseClient>, SpannerMiddlewareError> {
        if let Some(error) = self.fail_init_with.lock().expect("factory state poisoned").clone() {
            return Err(error);
        }
        self.clients_created.fetch_add(1, Ordering::SeqCst);
        *self.last_client_options.lock().expect("factory state poisoned") = Some(options.clone());
        *self.last_pool_config.lock().expect("factory state poisoned") = Some(pool.clone());
        Ok(Arc::new(FakeDatabaseClient {
            backend: Arc::clone(&self.backend),
        }))
    }

    async fn create_admin_client(
        &self,
        _ctx: &Context,
        _options: &ClientOptions,
    ) -> Result<Arc<dyn DatabaseAdminClient>, SpannerMiddlewareError> {
        self.admin_clients_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeAdminClient {
            backend: Arc::clone(&self.backend),
        }))
    }
}
