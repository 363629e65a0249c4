//! Bootstrap configuration (TOML).
//!
//! ```toml
//! [database]
//! host = "localhost"
//! port = 3306
//! username = "clp-user"
//!
//! [spider_db]
//! name = "spider-db"
//! username = "spider-user"
//! ```
//!
//! Credentials may be left out of the file and supplied through the
//! environment instead.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{Result, SpiderError};

pub const ENV_ADMIN_USER: &str = "SPIDER_DB_ADMIN_USER";
pub const ENV_ADMIN_PASS: &str = "SPIDER_DB_ADMIN_PASS";
pub const ENV_SPIDER_USER: &str = "SPIDER_DB_USER";
pub const ENV_SPIDER_PASS: &str = "SPIDER_DB_PASS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    pub database: DatabaseConfig,
    /// Absent means the deployment does not use the scheduler database.
    #[serde(default)]
    pub spider_db: Option<SpiderDbConfig>,
}

/// The metadata server. The account here connects with admin rights and is
/// also granted access to the scheduler database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpiderDbConfig {
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    3306
}

fn default_db_name() -> String {
    "spider-db".into()
}

impl DatabaseConfig {
    pub fn username(&self) -> Result<&str> {
        self.username.as_deref().ok_or_else(|| {
            SpiderError::Config(format!("database.username is not set (or {ENV_ADMIN_USER})"))
        })
    }
}

impl SpiderDbConfig {
    pub fn username(&self) -> Result<&str> {
        self.username.as_deref().ok_or_else(|| {
            SpiderError::Config(format!("spider_db.username is not set (or {ENV_SPIDER_USER})"))
        })
    }
}

impl BootstrapConfig {
    /// Fill missing credentials from `lookup` (normally the process
    /// environment). Values already in the file win.
    pub fn fill_credentials(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fill(&mut self.database.username, &lookup, ENV_ADMIN_USER);
        fill(&mut self.database.password, &lookup, ENV_ADMIN_PASS);
        if let Some(spider_db) = self.spider_db.as_mut() {
            fill(&mut spider_db.username, &lookup, ENV_SPIDER_USER);
            fill(&mut spider_db.password, &lookup, ENV_SPIDER_PASS);
        }
    }

    pub fn fill_credentials_from_env(&mut self) {
        self.fill_credentials(|key| std::env::var(key).ok());
    }
}

fn fill(slot: &mut Option<String>, lookup: &impl Fn(&str) -> Option<String>, key: &str) {
    if slot.is_none() {
        *slot = lookup(key);
    }
}

/// Read a bootstrap config and fill credentials from the environment.
pub fn load_bootstrap_config(path: impl AsRef<Path>) -> Result<BootstrapConfig> {
    let mut config: BootstrapConfig = crate::config::load_from_path(path)?;
    config.fill_credentials_from_env();
    Ok(config)
}
