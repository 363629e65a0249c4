//! AdminExecutor port - a privileged connection to the metadata server.

use async_trait::async_trait;

use crate::domain::Result;

#[async_trait]
pub trait AdminExecutor: Send + Sync {
    /// Run a statement with no default database selected.
    async fn execute(&self, statement: &str) -> Result<()>;

    /// Run a statement with `database` as the default database.
    async fn execute_in(&self, database: &str, statement: &str) -> Result<()>;
}
