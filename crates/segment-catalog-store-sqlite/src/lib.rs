use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use segment_catalog_core::{
    CatalogError, DataSource, Interval, InventorySnapshot, Segment, SegmentIntervalResolver,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS data_sources (
  name TEXT PRIMARY KEY,
  enabled INTEGER NOT NULL DEFAULT 1 CHECK (enabled IN (0, 1)),
  created_at TEXT NOT NULL,
  properties_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS segments (
  id TEXT PRIMARY KEY,
  data_source TEXT NOT NULL,
  start_ms INTEGER NOT NULL,
  end_ms INTEGER NOT NULL CHECK (end_ms >= start_ms),
  version TEXT NOT NULL,
  partition_num INTEGER NOT NULL CHECK (partition_num >= 0),
  used INTEGER NOT NULL DEFAULT 1 CHECK (used IN (0, 1)),
  created_at TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  FOREIGN KEY (data_source) REFERENCES data_sources(name)
);

CREATE INDEX IF NOT EXISTS idx_segments_data_source_used ON segments(data_source, used);
CREATE INDEX IF NOT EXISTS idx_segments_interval ON segments(data_source, start_ms, end_ms);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceStatus {
    pub name: String,
    pub enabled: bool,
    pub used_segments: usize,
    pub unused_segments: usize,
}

impl SqliteStore {
    /// Open a SQLite-backed segment metadata store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus { current_version, target_version: LATEST_SCHEMA_VERSION, pending_versions })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the database is newer than supported.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version == 0 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            debug!(version = 1, "applied schema migration");
        } else if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Register a data source name. Existing registrations are left untouched.
    ///
    /// # Errors
    /// Returns an error when the name is blank or persistence fails.
    pub fn register_data_source(
        &mut self,
        name: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<()> {
        if name.trim().is_empty() {
            return Err(anyhow!("data source name MUST be provided"));
        }
        let properties_json =
            serde_json::to_string(properties).context("failed to encode data source properties")?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO data_sources(name, enabled, created_at, properties_json)
                 VALUES (?1, 1, ?2, ?3)",
                params![name, now_rfc3339()?, properties_json],
            )
            .with_context(|| format!("failed to register data source {name}"))?;
        Ok(())
    }

    /// Persist a used segment, registering its data source on first sight.
    ///
    /// # Errors
    /// Returns an error when the segment is invalid, already registered, or persistence fails.
    pub fn register_segment(&mut self, segment: &Segment) -> Result<()> {
        segment.validate(&segment.data_source)?;
        let payload_json = serde_json::to_string(segment).context("failed to encode segment")?;
        let start_ms = epoch_millis(segment.interval.start())?;
        let end_ms = epoch_millis(segment.interval.end())?;
        let created_at = now_rfc3339()?;

        let tx = self.conn.transaction().context("failed to start segment transaction")?;
        tx.execute(
            "INSERT OR IGNORE INTO data_sources(name, enabled, created_at, properties_json)
             VALUES (?1, 1, ?2, '{}')",
            params![segment.data_source, created_at],
        )
        .with_context(|| format!("failed to register data source {}", segment.data_source))?;
        tx.execute(
            "INSERT INTO segments(
                id, data_source, start_ms, end_ms, version, partition_num, used, created_at, payload_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8)",
            params![
                segment.identifier,
                segment.data_source,
                start_ms,
                end_ms,
                segment.version,
                segment.partition_num,
                created_at,
                payload_json,
            ],
        )
        .with_context(|| format!("failed to insert segment {}", segment.identifier))?;
        tx.commit().context("failed to commit segment transaction")?;
        Ok(())
    }

    /// Drop a segment from the inventory without deleting its metadata.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn mark_segment_unused(&mut self, segment_id: &str) -> Result<bool> {
        self.set_segment_used(segment_id, false)
    }

    /// Flip the `used` flag of one segment. Returns false when the segment is unknown.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_segment_used(&mut self, segment_id: &str, used: bool) -> Result<bool> {
        let changed = self
            .conn
            .execute("UPDATE segments SET used = ?2 WHERE id = ?1", params![segment_id, used])
            .with_context(|| format!("failed to update segment {segment_id}"))?;
        Ok(changed > 0)
    }

    /// Enable or disable a data source. Disabled data sources stay in the known-name
    /// registry but drop out of the inventory and interval resolution.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_data_source_enabled(&mut self, name: &str, enabled: bool) -> Result<bool> {
        let changed = self
            .conn
            .execute("UPDATE data_sources SET enabled = ?2 WHERE name = ?1", params![name, enabled])
            .with_context(|| format!("failed to update data source {name}"))?;
        Ok(changed > 0)
    }

    /// Every registered data source name, enabled or disabled, sorted.
    ///
    /// # Errors
    /// Returns an error when the registry cannot be read.
    pub fn all_data_source_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM data_sources ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }

    /// # Errors
    /// Returns an error when the registry cannot be read.
    pub fn data_source_statuses(&self) -> Result<Vec<DataSourceStatus>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                d.name,
                d.enabled,
                COALESCE(SUM(CASE WHEN s.used = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN s.used = 0 THEN 1 ELSE 0 END), 0)
             FROM data_sources d
             LEFT JOIN segments s ON s.data_source = d.name
             GROUP BY d.name, d.enabled
             ORDER BY d.name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut statuses = Vec::new();
        for row in rows {
            let (name, enabled, used, unused) = row?;
            statuses.push(DataSourceStatus {
                name,
                enabled,
                used_segments: usize::try_from(used).context("negative used segment count")?,
                unused_segments: usize::try_from(unused).context("negative unused segment count")?,
            });
        }
        Ok(statuses)
    }

    /// Build the inventory snapshot: enabled data sources with at least one used segment,
    /// plus every registered name as the known-name registry.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn load_inventory(&self) -> Result<InventorySnapshot> {
        let properties = self.enabled_data_source_properties()?;

        let mut stmt = self.conn.prepare(
            "SELECT s.data_source, s.payload_json
             FROM segments s
             JOIN data_sources d ON d.name = s.data_source
             WHERE s.used = 1 AND d.enabled = 1
             ORDER BY s.data_source ASC, s.start_ms ASC, s.end_ms ASC, s.id ASC",
        )?;
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut data_sources: Vec<DataSource> = Vec::new();
        for row in rows {
            let (name, payload_json) = row?;
            let segment = decode_segment(&payload_json)?;
            match data_sources.last_mut() {
                Some(current) if current.name == name => current.segments.push(segment),
                _ => {
                    let mut data_source = DataSource::new(name.clone());
                    data_source.properties = properties.get(&name).cloned().unwrap_or_default();
                    data_source.segments.push(segment);
                    data_sources.push(data_source);
                }
            }
        }

        let known_names = self.all_data_source_names()?;
        debug!(
            loaded = data_sources.len(),
            known = known_names.len(),
            "loaded inventory snapshot"
        );
        InventorySnapshot::new(data_sources, known_names).map_err(anyhow::Error::from)
    }

    /// Used segments of an enabled data source overlapping at least one of `intervals`,
    /// ordered by interval start. An empty `intervals` slice matches nothing.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn used_segments_overlapping(
        &self,
        data_source: &str,
        intervals: &[Interval],
    ) -> Result<Vec<Segment>> {
        if intervals.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare_cached(
            "SELECT s.payload_json
             FROM segments s
             JOIN data_sources d ON d.name = s.data_source
             WHERE s.data_source = ?1 AND s.used = 1 AND d.enabled = 1
               AND s.start_ms <= ?3 AND s.end_ms >= ?2
             ORDER BY s.start_ms ASC, s.end_ms ASC, s.id ASC",
        )?;

        let mut seen = BTreeSet::new();
        let mut segments: Vec<Segment> = Vec::new();
        for interval in intervals {
            let start_ms = epoch_millis(interval.start())?;
            let end_ms = epoch_millis(interval.end())?;
            let rows = stmt
                .query_map(params![data_source, start_ms, end_ms], |row| row.get::<_, String>(0))?;
            for row in rows {
                let segment = decode_segment(&row?)?;
                // Millisecond bounds over-select; the exact half-open check decides.
                if !segment.interval.overlaps(interval) {
                    continue;
                }
                if !seen.insert(segment.identifier.clone()) {
                    continue;
                }
                segments.push(segment);
            }
        }

        segments.sort_by(|lhs, rhs| {
            lhs.interval
                .start()
                .cmp(&rhs.interval.start())
                .then_with(|| lhs.interval.end().cmp(&rhs.interval.end()))
                .then_with(|| lhs.identifier.cmp(&rhs.identifier))
        });
        debug!(data_source, intervals = intervals.len(), segments = segments.len(), "resolved used segments");
        Ok(segments)
    }

    /// # Errors
    /// Returns an error when the lookup fails.
    pub fn segment_exists(&self, segment_id: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM segments WHERE id = ?1", params![segment_id], |row| {
                row.get::<_, i64>(0)
            })
            .optional()
            .with_context(|| format!("failed to look up segment {segment_id}"))?;
        Ok(found.is_some())
    }

    /// Run SQLite integrity checks and report schema status.
    ///
    /// # Errors
    /// Returns an error when the pragmas cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    fn enabled_data_source_properties(&self) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
        let mut stmt =
            self.conn.prepare("SELECT name, properties_json FROM data_sources WHERE enabled = 1")?;
        let rows =
            stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut properties = BTreeMap::new();
        for row in rows {
            let (name, properties_json) = row?;
            let decoded: BTreeMap<String, String> = serde_json::from_str(&properties_json)
                .with_context(|| format!("invalid properties_json for data source {name}"))?;
            properties.insert(name, decoded);
        }
        Ok(properties)
    }
}

impl SegmentIntervalResolver for SqliteStore {
    fn used_segments_for_intervals(
        &self,
        data_source: &str,
        intervals: &[Interval],
    ) -> Result<Vec<Segment>, CatalogError> {
        self.used_segments_overlapping(data_source, intervals)
            .map_err(|err| CatalogError::Resolver(format!("{err:#}")))
    }
}

fn decode_segment(payload_json: &str) -> Result<Segment> {
    serde_json::from_str(payload_json).context("invalid segment payload_json")
}

fn epoch_millis(value: OffsetDateTime) -> Result<i64> {
    let millis = value.unix_timestamp_nanos().div_euclid(1_000_000);
    i64::try_from(millis).with_context(|| format!("timestamp out of range: {value}"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
