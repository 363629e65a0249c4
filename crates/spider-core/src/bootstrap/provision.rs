//! Provisioning of the scheduler database.
//!
//! The plan is computed up front and every name is validated before a
//! single statement runs, so invalid input never reaches the server.

use tracing::info;

use crate::bootstrap::config::BootstrapConfig;
use crate::bootstrap::identifier::{
    quote_account, quote_identifier, quote_literal, validate_identifier, validate_secret,
};
use crate::bootstrap::schema;
use crate::domain::Result;
use crate::ports::AdminExecutor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub database: String,
    /// Run without a default database: database, user, grants.
    pub admin: Vec<String>,
    /// Run inside `database`.
    pub schema: Vec<&'static str>,
}

impl ProvisionPlan {
    /// `None` when the config has no `[spider_db]` section.
    pub fn from_config(config: &BootstrapConfig) -> Result<Option<Self>> {
        let Some(spider_db) = &config.spider_db else {
            return Ok(None);
        };
        let db_name = spider_db.name.as_str();
        let db_user = spider_db.username()?;
        let app_user = config.database.username()?;

        validate_identifier("database name", db_name)?;
        validate_identifier("database user name", db_user)?;
        validate_identifier("application database user name", app_user)?;
        if let Some(password) = &spider_db.password {
            validate_secret("database user password", password)?;
        }

        let database = quote_identifier(db_name);
        let password = quote_literal(spider_db.password.as_deref().unwrap_or(""));
        let admin = vec![
            format!("CREATE DATABASE IF NOT EXISTS {database}"),
            format!(
                "CREATE USER IF NOT EXISTS {} IDENTIFIED BY {password}",
                quote_account(db_user)
            ),
            format!(
                "GRANT ALL PRIVILEGES ON {database}.* TO {}",
                quote_account(db_user)
            ),
            format!(
                "GRANT ALL PRIVILEGES ON {database}.* TO {}",
                quote_account(app_user)
            ),
        ];

        Ok(Some(Self {
            database: db_name.to_owned(),
            admin,
            schema: schema::statements().collect(),
        }))
    }

    pub async fn apply(&self, executor: &dyn AdminExecutor) -> Result<()> {
        for statement in &self.admin {
            executor.execute(statement).await?;
        }
        for statement in &self.schema {
            executor.execute_in(&self.database, statement).await?;
        }
        info!(database = %self.database, tables = self.schema.len(), "scheduler database provisioned");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::config::{DatabaseConfig, SpiderDbConfig};
    use crate::domain::SpiderError;
    use crate::impls::RecordingAdmin;

    fn config(name: &str, user: &str, password: Option<&str>) -> BootstrapConfig {
        BootstrapConfig {
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 3306,
                username: Some("clp-user".into()),
                password: Some("clp-pass".into()),
            },
            spider_db: Some(SpiderDbConfig {
                name: name.into(),
                username: Some(user.into()),
                password: password.map(Into::into),
            }),
        }
    }

    #[test]
    fn plan_creates_database_user_and_grants() {
        let plan = ProvisionPlan::from_config(&config("spider-db", "spider", Some("pw1")))
            .unwrap()
            .unwrap();
        assert_eq!(
            plan.admin,
            vec![
                "CREATE DATABASE IF NOT EXISTS `spider-db`",
                "CREATE USER IF NOT EXISTS 'spider'@'%' IDENTIFIED BY 'pw1'",
                "GRANT ALL PRIVILEGES ON `spider-db`.* TO 'spider'@'%'",
                "GRANT ALL PRIVILEGES ON `spider-db`.* TO 'clp-user'@'%'",
            ]
        );
        assert_eq!(plan.schema.len(), schema::TABLES.len());
    }

    #[test]
    fn missing_password_means_empty_password() {
        let plan = ProvisionPlan::from_config(&config("spider", "spider", None))
            .unwrap()
            .unwrap();
        assert!(plan.admin[1].ends_with("IDENTIFIED BY ''"));
    }

    #[test]
    fn no_spider_db_section_is_a_no_op() {
        let mut cfg = config("spider", "spider", None);
        cfg.spider_db = None;
        assert!(ProvisionPlan::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn invalid_names_are_rejected_before_any_statement() {
        for cfg in [
            config("spider; DROP DATABASE x", "spider", None),
            config("spider", "spider'@'%", None),
            config("spider", "spider", Some("pw' OR 1")),
        ] {
            let err = ProvisionPlan::from_config(&cfg).unwrap_err();
            assert!(matches!(err, SpiderError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn apply_runs_schema_inside_the_new_database() {
        let plan = ProvisionPlan::from_config(&config("spider", "spider", None))
            .unwrap()
            .unwrap();
        let admin = RecordingAdmin::new();
        plan.apply(&admin).await.unwrap();

        let statements = admin.statements().await;
        assert_eq!(statements.len(), plan.admin.len() + plan.schema.len());
        assert!(statements[..4].iter().all(|s| s.database.is_none()));
        assert!(
            statements[4..]
                .iter()
                .all(|s| s.database.as_deref() == Some("spider"))
        );
    }
}
