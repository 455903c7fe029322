use std::sync::Arc;

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::db::schema_sqlite::schema_version;
use crate::db::sqlite::{SqliteMessageStore, SqliteThreadStore};
use crate::db::{DatabaseError, MessageStore, ThreadStore};

pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

/// Structural revision this binary expects.
pub const SCHEMA_VERSION: i32 = 3;

#[derive(Debug)]
pub(crate) struct Migration {
    pub(crate) version: i32,
    pub(crate) description: &'static str,
    pub(crate) statements: &'static [&'static str],
}

pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create messages table",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS messages (
                telegram_message_id INTEGER PRIMARY KEY,
                chatwoot_conversation_id INTEGER NOT NULL,
                chatwoot_account_id INTEGER,
                chatwoot_message_id INTEGER
            )
            "#],
    },
    Migration {
        version: 2,
        description: "create topics table",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS topics (
                chatwoot_conversation_id INTEGER PRIMARY KEY,
                chatwoot_account_id INTEGER,
                telegram_topic_id INTEGER NOT NULL,
                topic_name TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#],
    },
    Migration {
        version: 3,
        description: "index topics by telegram topic id",
        statements: &[
            "CREATE INDEX IF NOT EXISTS idx_topics_telegram_topic_id ON topics(telegram_topic_id)",
        ],
    },
];

const CREATE_SCHEMA_VERSION_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )
"#;

/// Per-connection SQLite tuning. These only affect throughput and lock
/// waiting, never the store's contracts.
#[derive(Debug)]
struct SqliteTuning {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for SqliteTuning {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = {};
             PRAGMA cache_size = -64000;",
            self.busy_timeout_ms
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool,
    message_store: Arc<dyn MessageStore>,
    thread_store: Arc<dyn ThreadStore>,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let path = config.sqlite_path();
        let max_connections = config.max_connections.max(1);
        let busy_timeout_ms = config.busy_timeout_ms;

        let pool = tokio::task::spawn_blocking(move || {
            let manager = ConnectionManager::<SqliteConnection>::new(path);
            r2d2::Pool::builder()
                .max_size(max_connections)
                .min_idle(Some(1))
                .connection_customizer(Box::new(SqliteTuning { busy_timeout_ms }))
                .build(manager)
                .map_err(|e| DatabaseError::Connection(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Connection(format!("pool setup task failed: {e}")))??;

        debug!("sqlite pool ready max_connections={}", max_connections);

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: Pool) -> Self {
        Self {
            message_store: Arc::new(SqliteMessageStore::new(pool.clone())),
            thread_store: Arc::new(SqliteThreadStore::new(pool.clone())),
            pool,
        }
    }

    /// Brings the store up to [`SCHEMA_VERSION`]. Returns the version the
    /// store is at afterwards.
    pub async fn migrate(&self) -> Result<i32, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            run_migrations(&mut conn, MIGRATIONS)
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub async fn schema_version(&self) -> Result<i32, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            conn.batch_execute(CREATE_SCHEMA_VERSION_TABLE)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;
            current_version(&mut conn).map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    pub fn message_store(&self) -> Arc<dyn MessageStore> {
        self.message_store.clone()
    }

    pub fn thread_store(&self) -> Arc<dyn ThreadStore> {
        self.thread_store.clone()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn current_version(conn: &mut SqliteConnection) -> QueryResult<i32> {
    schema_version::table
        .filter(schema_version::id.eq(1))
        .select(schema_version::version)
        .first::<i32>(conn)
        .optional()
        .map(|version| version.unwrap_or(0))
}

/// Applies every migration newer than the stored version inside a single
/// transaction. Either all pending migrations and the version bump commit, or
/// the store stays at its previous version.
pub(crate) fn run_migrations(
    conn: &mut SqliteConnection,
    migrations: &[Migration],
) -> Result<i32, DatabaseError> {
    let target = migrations.last().map(|m| m.version).unwrap_or(0);

    conn.immediate_transaction(|conn| {
        conn.batch_execute(CREATE_SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        let current =
            current_version(conn).map_err(|e| DatabaseError::Migration(e.to_string()))?;
        info!(
            "database schema version current={} target={}",
            current, target
        );

        if current > target {
            return Err(DatabaseError::Migration(format!(
                "database schema version {current} is newer than supported version {target}"
            )));
        }
        if current == target {
            debug!("database schema is up to date");
            return Ok(current);
        }

        let mut previous = current;
        for migration in migrations.iter().filter(|m| m.version > current) {
            if migration.version <= previous {
                return Err(DatabaseError::Migration(format!(
                    "migration {} is out of order",
                    migration.version
                )));
            }
            info!(
                "applying migration version={} description={}",
                migration.version, migration.description
            );
            for statement in migration.statements {
                diesel::sql_query(*statement).execute(conn).map_err(|e| {
                    DatabaseError::Migration(format!(
                        "migration {} failed: {}",
                        migration.version, e
                    ))
                })?;
            }
            previous = migration.version;
        }

        diesel::replace_into(schema_version::table)
            .values((
                schema_version::id.eq(1),
                schema_version::version.eq(target),
                schema_version::updated_at.eq(Some(Utc::now().to_rfc3339())),
            ))
            .execute(conn)
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        info!("database migrated to version {}", target);
        Ok(target)
    })
}

impl From<diesel::result::Error> for DatabaseError {
    fn from(value: diesel::result::Error) -> Self {
        DatabaseError::Query(value.to_string())
    }
}
