//! AdminExecutor that records statements instead of running them.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::Result;
use crate::ports::AdminExecutor;

/// One executed statement and the default database it ran in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub database: Option<String>,
    pub statement: String,
}

/// Dry-run executor; `spider init-db --dry-run` prints what it recorded.
#[derive(Default)]
pub struct RecordingAdmin {
    statements: Mutex<Vec<RecordedStatement>>,
}

impl RecordingAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn statements(&self) -> Vec<RecordedStatement> {
        self.statements.lock().await.clone()
    }
}

#[async_trait]
impl AdminExecutor for RecordingAdmin {
    async fn execute(&self, statement: &str) -> Result<()> {
        self.statements.lock().await.push(RecordedStatement {
            database: None,
            statement: statement.to_owned(),
        });
        Ok(())
    }

    async fn execute_in(&self, database: &str, statement: &str) -> Result<()> {
        self.statements.lock().await.push(RecordedStatement {
            database: Some(database.to_owned()),
            statement: statement.to_owned(),
        });
        Ok(())
    }
}
