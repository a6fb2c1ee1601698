//! Seam for the client-side command interpreter.
//!
//! Hosts can plug in an interpreter that recognizes meta-statements (for
//! example "start a batch" or "set a mode") before the text is treated as
//! SQL. A recognized command bypasses normal dispatch entirely: no commit
//! timestamp is cleared and nothing reaches the backing client unless the
//! command itself does so.

use async_trait::async_trait;

use crate::connection::Connection;
use crate::context::Context;
use crate::error::SpannerMiddlewareError;
use crate::results::ResultSet;
use crate::values::Value;

/// Recognizes client-side commands in SQL-like text.
pub trait ClientCommandParser: Send + Sync {
    /// Returns the runnable command, or `None` when the text is ordinary SQL.
    fn parse(&self, sql: &str) -> Option<Box<dyn ClientCommand>>;
}

/// A parsed client-side command, runnable against the connection it was
/// issued on.
#[async_trait]
pub trait ClientCommand: Send + Sync {
    async fn query(
        &self,
        ctx: &Context,
        conn: &mut Connection,
        args: &[Value],
    ) -> Result<ResultSet, SpannerMiddlewareError>;

    async fn execute(
        &self,
        ctx: &Context,
        conn: &mut Connection,
        args: &[Value],
    ) -> Result<i64, SpannerMiddlewareError>;
}

/// Default parser: no client-side commands are recognized.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClientCommands;

impl ClientCommandParser for NoClientCommands {
    fn parse(&self, _sql: &str) -> Option<Box<dyn ClientCommand>> {
        None
    }
}
