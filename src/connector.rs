use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::client::{ClientFactory, DatabaseAdminClient, DatabaseClient};
use crate::command::{ClientCommandParser, NoClientCommands};
use crate::config::ConnectorOptions;
use crate::connection::Connection;
use crate::context::Context;
use crate::error::SpannerMiddlewareError;

/// The two lazily-created client handles shared by every connection of a
/// connector.
#[derive(Clone)]
pub struct ClientHandles {
    pub client: Arc<dyn DatabaseClient>,
    pub admin: Arc<dyn DatabaseAdminClient>,
}

/// Process-wide registry mapping connection descriptors to shared
/// connectors.
///
/// Two `open` calls with the same descriptor yield two connections backed
/// by one connector and one pair of client handles. The registry entry is
/// removed when the last connection closes, so a later `open` with the same
/// descriptor starts from scratch.
pub struct Driver {
    factory: Arc<dyn ClientFactory>,
    command_parser: Arc<dyn ClientCommandParser>,
    connectors: Mutex<HashMap<String, Arc<Connector>>>,
}

impl Driver {
    #[must_use]
    pub fn new(factory: Arc<dyn ClientFactory>) -> Arc<Self> {
        Self::with_command_parser(factory, Arc::new(NoClientCommands))
    }

    /// Build a driver whose connections route recognized client-side
    /// commands to the given interpreter.
    #[must_use]
    pub fn with_command_parser(
        factory: Arc<dyn ClientFactory>,
        command_parser: Arc<dyn ClientCommandParser>,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            command_parser,
            connectors: Mutex::new(HashMap::new()),
        })
    }

    /// Open a connection for the given descriptor, creating or reusing the
    /// connector registered under it.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for malformed descriptors and whatever the
    /// client factory reported if initialization failed (the failure is
    /// remembered for the connector's lifetime).
    pub async fn open(
        self: &Arc<Self>,
        ctx: &Context,
        descriptor: &str,
    ) -> Result<Connection, SpannerMiddlewareError> {
        let connector = self.connector(descriptor)?;
        let database = connector.options.config.database_name()?;
        let handles = connector.clients(ctx).await?;
        connector.conn_count.fetch_add(1, Ordering::AcqRel);
        Ok(Connection::new(
            connector,
            handles,
            database,
            Arc::clone(&self.command_parser),
        ))
    }

    /// Number of live connectors, mostly interesting to tests and metrics.
    #[must_use]
    pub fn connector_count(&self) -> usize {
        self.connectors.lock().expect("connector registry poisoned").len()
    }

    /// Number of open connections for a registered descriptor, or `None`
    /// when no connector is registered under it.
    #[must_use]
    pub fn connection_count(&self, descriptor: &str) -> Option<i32> {
        self.connectors
            .lock()
            .expect("connector registry poisoned")
            .get(descriptor)
            .map(|c| c.connection_count())
    }

    fn connector(
        self: &Arc<Self>,
        descriptor: &str,
    ) -> Result<Arc<Connector>, SpannerMiddlewareError> {
        let mut connectors = self.connectors.lock().expect("connector registry poisoned");
        if let Some(existing) = connectors.get(descriptor) {
            return Ok(Arc::clone(existing));
        }
        let options = ConnectorOptions::parse(descriptor)?;
        debug!(descriptor, "registering connector");
        let connector = Arc::new(Connector {
            driver: Arc::downgrade(self),
            descriptor: descriptor.to_string(),
            options,
            factory: Arc::clone(&self.factory),
            clients: OnceCell::new(),
            conn_count: AtomicI32::new(0),
        });
        connectors.insert(descriptor.to_string(), Arc::clone(&connector));
        Ok(connector)
    }

    fn deregister(&self, descriptor: &str) {
        let mut connectors = self.connectors.lock().expect("connector registry poisoned");
        connectors.remove(descriptor);
    }
}

/// Shared, reference-counted owner of the backing clients for one
/// descriptor.
pub struct Connector {
    driver: Weak<Driver>,
    descriptor: String,
    pub(crate) options: ConnectorOptions,
    factory: Arc<dyn ClientFactory>,
    clients: OnceCell<Result<ClientHandles, SpannerMiddlewareError>>,
    conn_count: AtomicI32,
}

impl Connector {
    /// Number of open connections sharing this connector.
    #[must_use]
    pub fn connection_count(&self) -> i32 {
        self.conn_count.load(Ordering::Acquire)
    }

    /// Whether abort retries are on by default for connections of this
    /// connector.
    #[must_use]
    pub fn retry_aborts_internally(&self) -> bool {
        self.options.retry_aborts_internally
    }

    /// Initialize the client handles exactly once. Concurrent first
    /// callers block until the single attempt finishes; all observe the
    /// same handles or the same error. A failed attempt is sticky for this
    /// connector's lifetime.
    pub(crate) async fn clients(
        &self,
        ctx: &Context,
    ) -> Result<ClientHandles, SpannerMiddlewareError> {
        let result = self
            .clients
            .get_or_init(|| async {
                let database = self.options.config.database_name()?;
                debug!(descriptor = %self.descriptor, "initializing backing clients");
                let client = self
                    .factory
                    .create_client(
                        ctx,
                        &database,
                        &self.options.client_options,
                        &self.options.pool_config,
                    )
                    .await?;
                let admin = self
                    .factory
                    .create_admin_client(ctx, &self.options.client_options)
                    .await?;
                Ok(ClientHandles { client, admin })
            })
            .await;
        result.clone()
    }

    /// Drop one connection's reference. The last reference tears down both
    /// client handles (awaited) and removes the connector from its driver's
    /// registry.
    pub(crate) async fn release(&self) -> Result<(), SpannerMiddlewareError> {
        let remaining = self.conn_count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 {
            return Ok(());
        }
        if let Some(driver) = self.driver.upgrade() {
            driver.deregister(&self.descriptor);
        }
        debug!(descriptor = %self.descriptor, "closing backing clients");
        if let Some(Ok(handles)) = self.clients.get() {
            let client_result = handles.client.close().await;
            let admin_result = handles.admin.close().await;
            client_result?;
            admin_result?;
        }
        Ok(())
    }

    /// Best-effort release for dropped connections that were never closed
    /// explicitly. Teardown runs on a spawned task when a runtime is
    /// available; otherwise the clients leak until process exit.
    pub(crate) fn release_detached(self: Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(error) = self.release().await {
                        warn!(%error, "connector teardown after drop failed");
                    }
                });
            }
            Err(_) => {
                let remaining = self.conn_count.fetch_sub(1, Ordering::AcqRel) - 1;
                if remaining <= 0 {
                    warn!(
                        descriptor = %self.descriptor,
                        "connection dropped outside a runtime; skipping client teardown"
                    );
                    if let Some(driver) = self.driver.upgrade() {
                        driver.deregister(&self.descriptor);
                    }
                }
            }
        }
    }
}
