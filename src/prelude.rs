//! Convenience re-exports for the common surface of the crate.

pub use crate::batch::BatchKind;
pub use crate::client::{
    ClientFactory, DatabaseAdminClient, DatabaseClient, ReadContext, TransactionContext,
    UpdateDdlOperation,
};
pub use crate::command::{ClientCommand, ClientCommandParser, NoClientCommands};
pub use crate::config::{ClientOptions, ConnectorConfig, SessionPoolConfig};
pub use crate::connection::{AutocommitDmlMode, Connection};
pub use crate::connector::Driver;
pub use crate::context::Context;
pub use crate::error::SpannerMiddlewareError;
pub use crate::pool::{ConnectionManager, ConnectionPool};
pub use crate::results::{DbRow, ResultSet};
pub use crate::statement::Statement;
pub use crate::transaction::TransactionOptions;
pub use crate::values::{
    CommitTimestamp, Mutation, MutationOp, TimestampBound, Value, ValueType,
};
