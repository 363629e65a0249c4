//! MariaDB/MySQL admin executor over sqlx.
//!
//! Admin statements run on a pool without a default database. Schema
//! statements need one, and `USE` does not stick across pooled connections,
//! so each target database gets its own pool with the database preselected.

use std::collections::HashMap;

use async_trait::async_trait;
use spider_core::bootstrap::DatabaseConfig;
use spider_core::ports::AdminExecutor;
use spider_core::{Result, SpiderError};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use tokio::sync::Mutex;
use tracing::debug;

pub struct MariaDbAdmin {
    options: MySqlConnectOptions,
    admin: MySqlPool,
    per_database: Mutex<HashMap<String, MySqlPool>>,
}

impl MariaDbAdmin {
    /// Prepare lazy pools; the first statement opens the connection.
    pub fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(config.username()?);
        if let Some(password) = &config.password {
            options = options.password(password);
        }
        let admin = pool_options().connect_lazy_with(options.clone());
        Ok(Self {
            options,
            admin,
            per_database: Mutex::new(HashMap::new()),
        })
    }

    async fn pool_for(&self, database: &str) -> MySqlPool {
        let mut pools = self.per_database.lock().await;
        pools
            .entry(database.to_owned())
            .or_insert_with(|| pool_options().connect_lazy_with(self.options.clone().database(database)))
            .clone()
    }

    pub async fn close(&self) {
        self.admin.close().await;
        for pool in self.per_database.lock().await.values() {
            pool.close().await;
        }
    }
}

fn pool_options() -> MySqlPoolOptions {
    MySqlPoolOptions::new().max_connections(1)
}

fn store_error(err: sqlx::Error) -> SpiderError {
    SpiderError::Store(err.to_string())
}

#[async_trait]
impl AdminExecutor for MariaDbAdmin {
    async fn execute(&self, statement: &str) -> Result<()> {
        debug!(statement, "admin statement");
        sqlx::raw_sql(statement)
            .execute(&self.admin)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn execute_in(&self, database: &str, statement: &str) -> Result<()> {
        debug!(database, statement, "schema statement");
        let pool = self.pool_for(database).await;
        sqlx::raw_sql(statement)
            .execute(&pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}
