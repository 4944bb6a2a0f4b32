use std::sync::Arc;
use std::time::Duration;

use romupunkt_core::config::{AppConfig, ConfigError, LoadOptions};
use romupunkt_core::session::SessionStore;
use romupunkt_db::{connect_with_settings, migrations, DbPool};
use romupunkt_telegram::{
    DispatchSettings, Dispatcher, Messenger, Stores, TelegramTransport, TemplateError, Templates,
    TransportError,
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub stores: Stores,
    pub dispatcher: Arc<Dispatcher>,
    /// Serves both as the update source and as the outbound messenger.
    pub transport: Arc<TelegramTransport>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("message templates failed to load: {0}")]
    Templates(#[from] TemplateError),
    #[error("telegram transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let templates = Arc::new(Templates::new()?);
    let transport = Arc::new(TelegramTransport::new(
        config.telegram.bot_token.expose_secret(),
        Duration::from_secs(config.telegram.poll_timeout_secs),
    )?);

    let stores = Stores::sql(db_pool.clone());
    let messenger: Arc<dyn Messenger> = transport.clone();
    let dispatcher = Arc::new(Dispatcher::new(
        DispatchSettings::from_config(&config),
        SessionStore::new(),
        stores.clone(),
        messenger,
        templates,
    ));
    info!(
        event_name = "system.bootstrap.ready",
        operator_id = config.telegram.operator_id,
        "services assembled"
    );

    Ok(Application { config, db_pool, stores, dispatcher, transport })
}

#[cfg(test)]
mod tests {
    use romupunkt_core::config::{ConfigOverrides, LoadOptions};

    use super::{bootstrap, BootstrapError};

    fn options(database_url: String) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url),
                bot_token: Some("123456:test-token".to_string()),
                operator_id: Some(9000),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_bot_token() {
        let mut options = options("sqlite::memory:".to_string());
        options.overrides.bot_token = Some(String::new());

        let result = bootstrap(options).await;

        let Err(error) = result else { panic!("bootstrap should refuse an empty token") };
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("telegram.bot_token"));
    }

    #[tokio::test]
    async fn bootstrap_creates_the_database_and_its_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("romupunkt.db").display());

        let app = bootstrap(options(url)).await.expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('lead', 'photo', 'offer', 'photo_session')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 4);
        assert!(app.dispatcher.sessions().is_empty());
        assert_eq!(app.config.telegram.operator_id, 9000);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn unreachable_database_path_is_a_connect_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("missing/dir/romupunkt.db").display());

        let result = bootstrap(options(url)).await;

        assert!(matches!(result, Err(BootstrapError::DatabaseConnect(_))));
    }
}
