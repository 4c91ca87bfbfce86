use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::mailer::{HttpMailer, LogMailer, Mailer};

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Hosted email function; emails are only logged when unset
    #[arg(long, env = "EMAIL_FUNCTION_URL")]
    pub email_function_url: Option<String>,

    #[arg(long, env = "BACKEND_ANON_KEY", hide_env_values = true)]
    pub backend_anon_key: Option<String>,

    /// Notify the EIT when a supervisor declines their request
    #[arg(long, env = "NOTIFY_ON_DENY")]
    pub notify_on_deny: bool,
}

impl Config {
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .context("failed to connect to Postgres")?;
        info!(max_connections = self.max_connections, "database pool ready");
        Ok(pool)
    }

    pub fn mailer(&self) -> Arc<dyn Mailer> {
        match &self.email_function_url {
            Some(url) => Arc::new(HttpMailer::new(url.clone(), self.backend_anon_key.clone())),
            None => {
                warn!("EMAIL_FUNCTION_URL not set, emails will only be logged");
                Arc::new(LogMailer)
            }
        }
    }
}
