// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL connectivity for the chain state store.
//!
//! [Db] owns a bb8 pool of async diesel connections. Every pooled connection is prepared with
//! the session settings derived from [DbArgs] before it is handed out.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use anyhow::{anyhow, Context};
use diesel::migration::{Migration, MigrationSource, MigrationVersion};
use diesel::pg::Pg;
use diesel::ConnectionError;
use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness};
use futures::FutureExt;
use url::Url;

const APPLICATION_NAME: &str = "chainstate-indexer";

#[derive(clap::Args, Debug, Clone)]
pub struct DbArgs {
    /// Connections kept in the pool, shared by ingestion workers and API readers
    #[arg(env, long, default_value_t = Self::default().db_pool_size)]
    pub db_pool_size: u32,

    /// How long to wait for a free pooled connection, in milliseconds
    #[arg(env, long, default_value_t = Self::default().db_connection_timeout_ms)]
    pub db_connection_timeout_ms: u64,

    /// Upper bound for a single statement, in milliseconds
    #[arg(env, long)]
    pub db_statement_timeout_ms: Option<u64>,

    /// Upper bound for waiting on a chain cursor row lock, in milliseconds
    #[arg(env, long)]
    pub db_lock_timeout_ms: Option<u64>,
}

impl Default for DbArgs {
    fn default() -> Self {
        Self {
            db_pool_size: 16,
            db_connection_timeout_ms: 30_000,
            db_statement_timeout_ms: None,
            db_lock_timeout_ms: None,
        }
    }
}

impl DbArgs {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connection_timeout_ms)
    }

    /// `SET` statements run on every new pooled connection
    pub fn session_settings(&self) -> Vec<String> {
        let mut settings = vec![format!("SET application_name = '{}'", APPLICATION_NAME)];
        if let Some(ms) = self.db_statement_timeout_ms {
            settings.push(format!("SET statement_timeout = {}", ms));
        }
        if let Some(ms) = self.db_lock_timeout_ms {
            settings.push(format!("SET lock_timeout = {}", ms));
        }
        settings
    }
}

/// Shared handle to the pool; clones share the same connections.
#[derive(Clone)]
pub struct Db {
    pool: Pool<AsyncPgConnection>,
    database_url: Url,
}

/// A pooled connection usable wherever `&mut AsyncPgConnection` is expected.
pub struct Connection<'a>(PooledConnection<'a, AsyncPgConnection>);

impl Db {
    pub async fn new(database_url: Url, args: DbArgs) -> anyhow::Result<Self> {
        let pool = build_pool(&database_url, &args).await?;
        tracing::info!(
            "[Db] Pool ready: {} connections to {}:{}",
            args.db_pool_size,
            database_url.host_str().unwrap_or("localhost"),
            database_url.port().unwrap_or(5432)
        );
        Ok(Self { pool, database_url })
    }

    /// Fails once [DbArgs::connection_timeout] elapses without a free connection.
    pub async fn connect(&self) -> anyhow::Result<Connection<'_>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Timed out waiting for a database connection")?;
        Ok(Connection(conn))
    }

    /// Applies pending embedded migrations and returns the versions that ran.
    pub async fn run_migrations(
        &self,
        migrations: &'static EmbeddedMigrations,
    ) -> anyhow::Result<Vec<MigrationVersion<'static>>> {
        let conn = AsyncPgConnection::establish(self.database_url.as_str())
            .await
            .map_err(|e| anyhow!("Failed to open migration connection: {}", e))?;
        let mut harness: AsyncConnectionWrapper<AsyncPgConnection> = conn.into();

        // The harness is synchronous.
        let applied = tokio::task::spawn_blocking(move || {
            harness
                .run_pending_migrations(StaticMigrations(migrations))
                .map(|versions| versions.iter().map(MigrationVersion::as_owned).collect::<Vec<_>>())
        })
        .await?
        .map_err(|e| anyhow!("Failed to run migrations: {:?}", e))?;

        if applied.is_empty() {
            tracing::info!("[Db] Schema is up to date");
        } else {
            tracing::info!("[Db] Applied {} migration(s)", applied.len());
        }
        Ok(applied)
    }
}

impl<'a> Deref for Connection<'a> {
    type Target = PooledConnection<'a, AsyncPgConnection>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Connection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

async fn build_pool(database_url: &Url, args: &DbArgs) -> anyhow::Result<Pool<AsyncPgConnection>> {
    let settings = args.session_settings();
    let mut config = ManagerConfig::default();
    config.custom_setup = Box::new(move |url| {
        let settings = settings.clone();
        async move {
            let mut conn = AsyncPgConnection::establish(url).await?;
            for statement in settings {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .await
                    .map_err(ConnectionError::CouldntSetupConfiguration)?;
            }
            Ok(conn)
        }
        .boxed()
    });

    let manager = AsyncDieselConnectionManager::new_with_config(database_url.as_str(), config);
    Pool::builder()
        .max_size(args.db_pool_size)
        .connection_timeout(args.connection_timeout())
        .build(manager)
        .await
        .context("Failed to build database pool")
}

/// `EmbeddedMigrations` behind a `'static` reference, movable onto the blocking pool.
struct StaticMigrations(&'static EmbeddedMigrations);

impl MigrationSource<Pg> for StaticMigrations {
    fn migrations(&self) -> diesel::migration::Result<Vec<Box<dyn Migration<Pg>>>> {
        MigrationSource::<Pg>::migrations(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::prelude::QueryableByName;

    #[derive(Debug, QueryableByName)]
    struct SettingRow {
        #[diesel(sql_type = diesel::sql_types::Text)]
        setting: String,
    }

    #[test]
    fn test_default_session_settings() {
        let args = DbArgs::default();
        assert_eq!(args.db_pool_size, 16);
        assert_eq!(args.connection_timeout(), Duration::from_secs(30));
        assert_eq!(
            args.session_settings(),
            vec!["SET application_name = 'chainstate-indexer'".to_string()]
        );
    }

    #[test]
    fn test_timeouts_become_session_settings() {
        let args = DbArgs {
            db_statement_timeout_ms: Some(1_500),
            db_lock_timeout_ms: Some(250),
            ..DbArgs::default()
        };
        let settings = args.session_settings();
        assert_eq!(settings.len(), 3);
        assert_eq!(settings[1], "SET statement_timeout = 1500");
        assert_eq!(settings[2], "SET lock_timeout = 250");
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL environment variable
    async fn test_migrations_and_session_setup() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let database_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL environment variable must be set");
        let url: Url = database_url.parse().expect("Invalid database URL format");

        let db = Db::new(
            url,
            DbArgs {
                db_lock_timeout_ms: Some(250),
                ..DbArgs::default()
            },
        )
        .await
        .expect("Failed to connect to database");
        db.run_migrations(&chainstate_schema::MIGRATIONS)
            .await
            .expect("Failed to run migrations");
        // Second run finds nothing pending.
        let again = db
            .run_migrations(&chainstate_schema::MIGRATIONS)
            .await
            .expect("Failed to re-run migrations");
        assert!(again.is_empty());

        let mut conn = db.connect().await.expect("Failed to get connection");
        let row: SettingRow = diesel::sql_query("SELECT current_setting('lock_timeout') AS setting")
            .get_result(&mut conn)
            .await
            .expect("Failed to read session setting");
        assert_eq!(row.setting, "250ms");
    }
}
