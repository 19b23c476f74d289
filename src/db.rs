use std::str::FromStr;

use anyhow::Context;
use futures::TryStreamExt;
use sqlx::{
    pool::PoolConnection,
    query::QueryAs,
    sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    FromRow, Sqlite, SqliteConnection, SqlitePool,
};
use thiserror::Error;
use tracing::{debug, error};

use crate::config::AppConfig;

/// Persistence failures surfaced to callers.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique or primary-key constraint rejected the write.
    #[error("unique constraint violated")]
    Conflict,

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(e),
        }
    }
}

pub async fn connect(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .context("parse DATABASE_URL")?
        .create_if_missing(true)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .context("connect to database")
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("run migrations")
}

/// Single-connection pool over a private in-memory database, schema applied.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("memory url parses")
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("memory pool connects");
    migrate(&pool).await.expect("migrations apply");
    pool
}

/// Whether a lookup miss should be written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Log,
    Silent,
}

enum Lookup<T> {
    One(T),
    Missing,
    Ambiguous,
}

/// Unit of work around one pooled connection.
///
/// Acquired when a request starts and handed back by [`DbSession::remove`]
/// when it ends. Dropping the session releases the connection as well, so
/// error and panic paths cannot leak it.
pub struct DbSession {
    conn: PoolConnection<Sqlite>,
}

impl DbSession {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, StoreError> {
        let conn = pool.acquire().await?;
        debug!("db session opened");
        Ok(Self { conn })
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Runs a query that should match exactly one row.
    ///
    /// Zero or several matches yield `Ok(None)` and an error-level log entry
    /// naming `label`; only store failures are returned as `Err`.
    pub async fn fetch_one_or_report<'q, T>(
        &mut self,
        query: QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
        label: &str,
    ) -> Result<Option<T>, StoreError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        self.fetch_one_with(query, label, Report::Log).await
    }

    pub async fn fetch_one_with<'q, T>(
        &mut self,
        query: QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
        label: &str,
        report: Report,
    ) -> Result<Option<T>, StoreError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        match self.lookup(query).await? {
            Lookup::One(row) => Ok(Some(row)),
            Lookup::Ambiguous => {
                if report == Report::Log {
                    error!(label = %label, "too many results for `{}`", label);
                }
                Ok(None)
            }
            Lookup::Missing => {
                if report == Report::Log {
                    error!(label = %label, "`{}` does not exist", label);
                }
                Ok(None)
            }
        }
    }

    async fn lookup<'q, T>(
        &mut self,
        query: QueryAs<'q, Sqlite, T, SqliteArguments<'q>>,
    ) -> Result<Lookup<T>, StoreError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let mut rows = query.fetch(&mut *self.conn);
        let Some(first) = rows.try_next().await? else {
            return Ok(Lookup::Missing);
        };
        if rows.try_next().await?.is_some() {
            return Ok(Lookup::Ambiguous);
        }
        Ok(Lookup::One(first))
    }

    /// Ends the unit of work and returns the connection to the pool.
    pub fn remove(self) {
        drop(self.conn);
        debug!("db session released");
    }
}

#[cfg(test)]
pub(crate) mod log_capture {
    use std::sync::{Arc, Mutex};

    use tracing::field::{Field, Visit};
    use tracing_subscriber::{layer::Context, prelude::*, Layer};

    /// Collects the messages of events emitted by this crate.
    #[derive(Clone, Default)]
    pub struct CapturedLogs(Arc<Mutex<Vec<String>>>);

    impl CapturedLogs {
        pub fn install(&self) -> tracing::subscriber::DefaultGuard {
            let subscriber = tracing_subscriber::registry().with(self.clone());
            tracing::subscriber::set_default(subscriber)
        }

        pub fn messages(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for CapturedLogs {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if !event.metadata().target().starts_with("qaboard") {
                return;
            }
            if *event.metadata().level() != tracing::Level::ERROR {
                return;
            }
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0.lock().unwrap().push(visitor.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::log_capture::CapturedLogs;
    use super::*;

    #[derive(Debug, FromRow)]
    struct Name {
        username: String,
    }

    async fn session_with_users(names: &[&str]) -> DbSession {
        let pool = memory_pool().await;
        let mut session = DbSession::begin(&pool).await.expect("acquire");
        for name in names {
            sqlx::query("INSERT INTO users (username, password_hash) VALUES ($1, 'x')")
                .bind(*name)
                .execute(session.conn())
                .await
                .expect("insert user");
        }
        session
    }

    fn by_prefix(prefix: &str) -> QueryAs<'_, Sqlite, Name, SqliteArguments<'_>> {
        sqlx::query_as::<_, Name>("SELECT username FROM users WHERE username LIKE $1 || '%'")
            .bind(prefix)
    }

    #[tokio::test]
    async fn exactly_one_match_returns_row_without_logging() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let mut session = session_with_users(&["alice", "bob"]).await;

        let row = session
            .fetch_one_or_report(by_prefix("ali"), "user alice")
            .await
            .expect("lookup");

        assert_eq!(row.map(|r| r.username).as_deref(), Some("alice"));
        assert!(logs.messages().is_empty());
    }

    #[tokio::test]
    async fn zero_matches_returns_none_and_logs_once() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let mut session = session_with_users(&["alice"]).await;

        let row = session
            .fetch_one_or_report(by_prefix("zed"), "user zed")
            .await
            .expect("lookup");

        assert!(row.is_none());
        assert_eq!(logs.messages(), vec!["`user zed` does not exist".to_string()]);
    }

    #[tokio::test]
    async fn many_matches_returns_none_and_logs_once() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let mut session = session_with_users(&["ann", "anna", "annie"]).await;

        let row = session
            .fetch_one_or_report(by_prefix("ann"), "user ann")
            .await
            .expect("lookup");

        assert!(row.is_none());
        assert_eq!(
            logs.messages(),
            vec!["too many results for `user ann`".to_string()]
        );
    }

    #[tokio::test]
    async fn silent_lookup_keeps_nullable_result_without_logging() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();
        let mut session = session_with_users(&["ann", "anna"]).await;

        let many = session
            .fetch_one_with(by_prefix("ann"), "user ann", Report::Silent)
            .await
            .expect("lookup");
        let none = session
            .fetch_one_with(by_prefix("zed"), "user zed", Report::Silent)
            .await
            .expect("lookup");

        assert!(many.is_none());
        assert!(none.is_none());
        assert!(logs.messages().is_empty());
    }

    #[tokio::test]
    async fn removed_session_returns_connection_to_pool() {
        let pool = memory_pool().await;
        let session = DbSession::begin(&pool).await.expect("first acquire");
        session.remove();

        // The pool holds a single connection, so this only succeeds if the
        // first unit of work gave it back.
        let again = DbSession::begin(&pool).await.expect("second acquire");
        again.remove();
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn duplicate_username_maps_to_conflict() {
        let mut session = session_with_users(&["alice"]).await;
        let err = sqlx::query("INSERT INTO users (username, password_hash) VALUES ('alice', 'y')")
            .execute(session.conn())
            .await
            .map_err(StoreError::from)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }
}
