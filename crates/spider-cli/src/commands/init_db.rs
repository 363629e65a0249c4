//! `spider init-db`: create the scheduler database, its user and its tables.

use anyhow::{Context, Result};
use spider_core::bootstrap::{BootstrapConfig, ProvisionPlan, load_bootstrap_config};
use spider_core::impls::RecordingAdmin;
use tracing::info;

use crate::cli::InitDbArgs;

pub async fn run(args: InitDbArgs) -> Result<()> {
    let config = load_bootstrap_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let Some(plan) = ProvisionPlan::from_config(&config)? else {
        info!("no [spider_db] section, nothing to provision");
        return Ok(());
    };

    if args.dry_run {
        let admin = RecordingAdmin::new();
        plan.apply(&admin).await?;
        print!("{}", render_statements(&admin).await);
        return Ok(());
    }

    apply(&config, &plan).await
}

/// Render recorded statements as a script, switching databases as needed.
async fn render_statements(admin: &RecordingAdmin) -> String {
    let mut out = String::new();
    let mut current: Option<String> = None;
    for recorded in admin.statements().await {
        if recorded.database.is_some() && recorded.database != current {
            if let Some(database) = &recorded.database {
                out.push_str(&format!("USE `{database}`;\n"));
            }
            current = recorded.database.clone();
        }
        out.push_str(recorded.statement.trim());
        out.push_str(";\n");
    }
    out
}

#[cfg(feature = "mariadb")]
async fn apply(config: &BootstrapConfig, plan: &ProvisionPlan) -> Result<()> {
    let admin = crate::backends::mariadb::MariaDbAdmin::connect(&config.database)?;
    plan.apply(&admin).await?;
    admin.close().await;
    Ok(())
}

#[cfg(not(feature = "mariadb"))]
async fn apply(_config: &BootstrapConfig, _plan: &ProvisionPlan) -> Result<()> {
    anyhow::bail!("built without the `mariadb` feature; use --dry-run")
}

#[cfg(test)]
mod tests {
    use super::*;
    use spider_core::ports::AdminExecutor;

    #[tokio::test]
    async fn dry_run_script_switches_database_once() {
        let admin = RecordingAdmin::new();
        admin.execute("CREATE DATABASE IF NOT EXISTS `spider-db`").await.unwrap();
        admin.execute_in("spider-db", "CREATE TABLE a (x INT)").await.unwrap();
        admin.execute_in("spider-db", "CREATE TABLE b (x INT)").await.unwrap();

        let script = render_statements(&admin).await;
        assert_eq!(
            script,
            "CREATE DATABASE IF NOT EXISTS `spider-db`;\nUSE `spider-db`;\nCREATE TABLE a (x INT);\nCREATE TABLE b (x INT);\n"
        );
    }
}
