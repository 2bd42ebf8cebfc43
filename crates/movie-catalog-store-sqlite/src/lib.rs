use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use movie_catalog_core::{
    creation_timestamp, next_version, Movie, MovieStore, Runtime, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

/// Upper bound on a single store call, covering lock waits and statement execution.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(3);

/// SQLite virtual-machine instructions between deadline checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1_000;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS movies (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL,
  title TEXT NOT NULL,
  year INTEGER NOT NULL CHECK (year >= 1888),
  runtime INTEGER NOT NULL CHECK (runtime > 0),
  genres_json TEXT NOT NULL,
  version INTEGER NOT NULL DEFAULT 1 CHECK (version >= 1)
);
";

const SELECT_MOVIE_SQL: &str = r"
SELECT id, created_at, title, year, runtime, genres_json, version
FROM movies
WHERE id = ?1
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

/// SQLite-backed [`MovieStore`].
///
/// Holds only the database location. Every operation opens its own
/// connection, bounds it by the configured timeout and drops it before
/// returning, so no handle outlives the call that created it.
#[derive(Debug, Clone)]
pub struct SqliteMovieStore {
    db_path: PathBuf,
    timeout: Duration,
}

impl SqliteMovieStore {
    /// Open (creating if needed) the database at `path` and apply pending migrations.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn open(path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let store = Self { db_path: path.into(), timeout };
        let mut conn = store.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("failed to configure sqlite journal mode")?;
        migrate(&mut conn)?;
        Ok(store)
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let conn = self.connect()?;
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).with_context(|| {
            format!("failed to open sqlite database at {}", self.db_path.display())
        })?;
        conn.busy_timeout(self.timeout).context("failed to configure sqlite busy timeout")?;

        let deadline = Instant::now() + self.timeout;
        conn.progress_handler(PROGRESS_CHECK_INTERVAL, Some(move || Instant::now() >= deadline));

        Ok(conn)
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.connect().map_err(|err| unavailable(&format!("{err:#}")))?;
        op(&conn)
    }
}

impl MovieStore for SqliteMovieStore {
    fn insert(&self, movie: &mut Movie) -> Result<(), StoreError> {
        let created_at = creation_timestamp();
        let created_at_raw = rfc3339(created_at).map_err(|err| unavailable(&err))?;
        let genres_json = serde_json::to_string(&movie.genres).map_err(|err| unavailable(&err))?;

        let (id, version) = self.with_connection(|conn| {
            conn.query_row(
                "INSERT INTO movies(created_at, title, year, runtime, genres_json, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 RETURNING id, version",
                params![
                    created_at_raw,
                    movie.title,
                    movie.year,
                    movie.runtime.minutes(),
                    genres_json
                ],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i32>(1)?)),
            )
            .map_err(|err| unavailable(&err))
        })?;

        movie.id = id;
        movie.created_at = created_at;
        movie.version = version;
        Ok(())
    }

    fn get(&self, id: i64) -> Result<Movie, StoreError> {
        if id < 1 {
            return Err(StoreError::RecordNotFound);
        }

        self.with_connection(|conn| {
            conn.query_row(SELECT_MOVIE_SQL, params![id], MovieRow::read)
                .optional()
                .map_err(|err| unavailable(&err))?
                .ok_or(StoreError::RecordNotFound)?
                .into_movie()
                .map_err(|err| unavailable(&format!("{err:#}")))
        })
    }

    fn update(&self, movie: &mut Movie) -> Result<(), StoreError> {
        next_version(movie.version)?;
        let genres_json = serde_json::to_string(&movie.genres).map_err(|err| unavailable(&err))?;

        let version = self.with_connection(|conn| {
            conn.query_row(
                "UPDATE movies
                 SET title = ?1, year = ?2, runtime = ?3, genres_json = ?4, version = version + 1
                 WHERE id = ?5 AND version = ?6
                 RETURNING version",
                params![
                    movie.title,
                    movie.year,
                    movie.runtime.minutes(),
                    genres_json,
                    movie.id,
                    movie.version
                ],
                |row| row.get::<_, i32>(0),
            )
            .optional()
            .map_err(|err| unavailable(&err))?
            .ok_or(StoreError::EditConflict)
        })?;

        movie.version = version;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), StoreError> {
        if id < 1 {
            return Err(StoreError::RecordNotFound);
        }

        let affected = self.with_connection(|conn| {
            conn.execute("DELETE FROM movies WHERE id = ?1", params![id])
                .map_err(|err| unavailable(&err))
        })?;

        if affected == 0 {
            return Err(StoreError::RecordNotFound);
        }
        Ok(())
    }
}

struct MovieRow {
    id: i64,
    created_at: String,
    title: String,
    year: i32,
    runtime: i32,
    genres_json: String,
    version: i32,
}

impl MovieRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            title: row.get(2)?,
            year: row.get(3)?,
            runtime: row.get(4)?,
            genres_json: row.get(5)?,
            version: row.get(6)?,
        })
    }

    fn into_movie(self) -> Result<Movie> {
        let genres = serde_json::from_str(&self.genres_json)
            .with_context(|| format!("failed to deserialize genres for movie {}", self.id))?;
        Ok(Movie {
            id: self.id,
            created_at: parse_rfc3339(&self.created_at)?,
            title: self.title,
            year: self.year,
            runtime: Runtime(self.runtime),
            genres,
            version: self.version,
        })
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
        .context("failed to apply schema_migrations table")?;

    let version = current_schema_version(conn)?;
    if version == 0 {
        let tx = conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;
        return Ok(());
    }

    if version != LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
        ));
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read schema version")
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, rfc3339(OffsetDateTime::now_utc())?],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn unavailable(err: &dyn std::fmt::Display) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value.format(&Rfc3339).context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
