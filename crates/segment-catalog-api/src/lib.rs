use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use segment_catalog_core::{
    ensure_data_source_readable, Access, Authorizer, CatalogError, CatalogQueryService,
    DataSource, DataSourceListing, Interval, ListDataSourcesOptions, PerResourceFilter,
    RequesterIdentity, ResourceAction, Segment, SegmentListing,
};
use segment_catalog_store_sqlite::{DataSourceStatus, IntegrityReport, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const API_CONTRACT_VERSION: &str = "api.v1";
pub const DEFAULT_ANONYMOUS_PRINCIPAL: &str = "anonymous";
const WILDCARD_GRANT: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterSegmentRequest {
    pub data_source: String,
    pub interval: Interval,
    pub version: String,
    #[serde(default)]
    pub partition_num: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub load_spec: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentUsageResult {
    pub segment_id: String,
    pub used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceToggleResult {
    pub data_source: String,
    pub enabled: bool,
}

/// Access policy file.
///
/// ```yaml
/// anonymous_principal: guest
/// principals:
///   analyst: [wikipedia, clicks]
///   admin: ["*"]
/// ```
///
/// Principals not listed may read nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessPolicy {
    #[serde(default = "default_anonymous_principal")]
    pub anonymous_principal: String,
    #[serde(default)]
    pub principals: BTreeMap<String, Vec<String>>,
}

fn default_anonymous_principal() -> String {
    DEFAULT_ANONYMOUS_PRINCIPAL.to_string()
}

impl AccessPolicy {
    /// # Errors
    /// Returns an error when the YAML is malformed or a grant is blank.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let policy: Self = serde_yaml::from_str(raw).context("invalid access policy YAML")?;
        if policy.anonymous_principal.trim().is_empty() {
            return Err(anyhow!("anonymous_principal MUST NOT be blank"));
        }
        for (principal, grants) in &policy.principals {
            if grants.iter().any(|grant| grant.trim().is_empty()) {
                return Err(anyhow!("principal {principal} has a blank data source grant"));
            }
        }
        Ok(policy)
    }

    /// # Errors
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read access policy {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("failed to load access policy {}", path.display()))
    }
}

/// Allows every resource-action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(
        &self,
        _identity: &RequesterIdentity,
        _resource_action: &ResourceAction,
    ) -> Result<Access, CatalogError> {
        Ok(Access::Allow)
    }
}

/// Static principal-to-data-source grants, `"*"` granting every data source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantTable {
    grants: BTreeMap<String, BTreeSet<String>>,
}

impl GrantTable {
    #[must_use]
    pub fn from_policy(policy: &AccessPolicy) -> Self {
        let grants = policy
            .principals
            .iter()
            .map(|(principal, names)| (principal.clone(), names.iter().cloned().collect()))
            .collect();
        Self { grants }
    }
}

impl Authorizer for GrantTable {
    fn authorize(
        &self,
        identity: &RequesterIdentity,
        resource_action: &ResourceAction,
    ) -> Result<Access, CatalogError> {
        let allowed = self.grants.get(identity.principal()).is_some_and(|names| {
            names.contains(WILDCARD_GRANT) || names.contains(&resource_action.resource.name)
        });
        Ok(if allowed { Access::Allow } else { Access::Deny })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogAuthorizer {
    AllowAll(AllowAll),
    Grants(GrantTable),
}

impl Authorizer for CatalogAuthorizer {
    fn authorize(
        &self,
        identity: &RequesterIdentity,
        resource_action: &ResourceAction,
    ) -> Result<Access, CatalogError> {
        match self {
            Self::AllowAll(authorizer) => authorizer.authorize(identity, resource_action),
            Self::Grants(authorizer) => authorizer.authorize(identity, resource_action),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentCatalogApi {
    db_path: PathBuf,
    authorizer: CatalogAuthorizer,
    anonymous_principal: String,
}

impl SegmentCatalogApi {
    /// Catalog over `db_path` that allows every read.
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            authorizer: CatalogAuthorizer::AllowAll(AllowAll),
            anonymous_principal: DEFAULT_ANONYMOUS_PRINCIPAL.to_string(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: &AccessPolicy) -> Self {
        self.authorizer = CatalogAuthorizer::Grants(GrantTable::from_policy(policy));
        self.anonymous_principal.clone_from(&policy.anonymous_principal);
        self
    }

    /// Requester identity for an optional principal; missing or blank means anonymous.
    #[must_use]
    pub fn identity(&self, principal: Option<&str>) -> RequesterIdentity {
        match principal.map(str::trim) {
            Some(principal) if !principal.is_empty() => RequesterIdentity::new(principal),
            _ => RequesterIdentity::new(self.anonymous_principal.clone()),
        }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn filter(&self) -> PerResourceFilter<CatalogAuthorizer> {
        PerResourceFilter::new(self.authorizer.clone())
    }

    /// Open the store, load a fresh snapshot and run `query` against it.
    fn with_catalog<T>(
        &self,
        query: impl FnOnce(&CatalogQueryService<'_>) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut store = self.open_store().map_err(inventory_error)?;
        store.migrate().map_err(inventory_error)?;
        let snapshot = store.load_inventory().map_err(inventory_error)?;
        let filter = self.filter();
        let catalog = CatalogQueryService::new(&snapshot, &store, &filter);
        query(&catalog)
    }

    /// Single-data-source reads: the gate runs before the store is touched.
    fn with_readable_catalog<T>(
        &self,
        identity: &RequesterIdentity,
        name: &str,
        query: impl FnOnce(&CatalogQueryService<'_>) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        ensure_data_source_readable(&self.filter(), identity, name)?;
        self.with_catalog(query)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the database cannot be opened or checked.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = self.open_store()?;
        store.integrity_check()
    }

    /// Register one used segment under its canonical identifier.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn register_segment(&self, input: RegisterSegmentRequest) -> Result<Segment> {
        let mut store = self.open_store()?;
        store.migrate()?;
        let segment = build_segment(input);
        store.register_segment(&segment)?;
        debug!(segment_id = %segment.identifier, "registered segment");
        Ok(segment)
    }

    /// # Errors
    /// Returns an error when the segment is unknown or persistence fails.
    pub fn mark_segment_unused(&self, segment_id: &str) -> Result<SegmentUsageResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        if !store.mark_segment_unused(segment_id)? {
            return Err(anyhow!("segment not found: {segment_id}"));
        }
        Ok(SegmentUsageResult { segment_id: segment_id.to_string(), used: false })
    }

    /// # Errors
    /// Returns an error when the data source is unknown or persistence fails.
    pub fn set_data_source_enabled(&self, name: &str, enabled: bool) -> Result<DataSourceToggleResult> {
        let mut store = self.open_store()?;
        store.migrate()?;
        if !store.set_data_source_enabled(name, enabled)? {
            return Err(anyhow!("data source not found: {name}"));
        }
        Ok(DataSourceToggleResult { data_source: name.to_string(), enabled })
    }

    /// Registry view for operators, ignoring the access policy.
    ///
    /// # Errors
    /// Returns an error when the registry cannot be read.
    pub fn data_source_statuses(&self) -> Result<Vec<DataSourceStatus>> {
        let mut store = self.open_store()?;
        store.migrate()?;
        store.data_source_statuses()
    }

    /// # Errors
    /// Propagates store, inventory, and authorization failures as [`CatalogError`].
    pub fn list_data_sources(
        &self,
        identity: &RequesterIdentity,
        options: ListDataSourcesOptions,
    ) -> Result<DataSourceListing, CatalogError> {
        self.with_catalog(|catalog| catalog.list_data_sources(options, identity))
    }

    /// # Errors
    /// Returns [`CatalogError::Forbidden`] before any lookup when `identity` may not read
    /// `name`, then [`CatalogError::DataSourceNotFound`] when it is absent.
    pub fn get_data_source(
        &self,
        identity: &RequesterIdentity,
        name: &str,
    ) -> Result<DataSource, CatalogError> {
        self.with_readable_catalog(identity, name, |catalog| catalog.get_data_source(name))
    }

    /// # Errors
    /// Same gate and not-found behavior as [`Self::get_data_source`].
    pub fn list_segments(
        &self,
        identity: &RequesterIdentity,
        name: &str,
        full: bool,
    ) -> Result<SegmentListing, CatalogError> {
        self.with_readable_catalog(identity, name, |catalog| catalog.list_segments(name, full))
    }

    /// # Errors
    /// Returns [`CatalogError::Forbidden`] or a resolver failure. Unknown data sources
    /// resolve to an empty listing.
    pub fn resolve_segments(
        &self,
        identity: &RequesterIdentity,
        name: &str,
        intervals: &[Interval],
        full: bool,
    ) -> Result<SegmentListing, CatalogError> {
        self.with_readable_catalog(identity, name, |catalog| {
            catalog.resolve_segments_by_intervals(name, intervals, full)
        })
    }

    /// # Errors
    /// Returns [`CatalogError::Forbidden`], [`CatalogError::DataSourceNotFound`] or
    /// [`CatalogError::SegmentNotFound`].
    pub fn get_segment(
        &self,
        identity: &RequesterIdentity,
        name: &str,
        segment_id: &str,
    ) -> Result<Segment, CatalogError> {
        self.with_readable_catalog(identity, name, |catalog| catalog.get_segment(name, segment_id))
    }
}

/// Parse `start/end` interval strings, reporting the first malformed entry.
///
/// # Errors
/// Returns [`CatalogError::Validation`] for the first interval that fails to parse.
pub fn parse_intervals<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Interval>, CatalogError> {
    raw.iter().map(|value| value.as_ref().parse()).collect()
}

fn inventory_error(err: anyhow::Error) -> CatalogError {
    CatalogError::Inventory(format!("{err:#}"))
}

fn build_segment(input: RegisterSegmentRequest) -> Segment {
    let mut segment =
        Segment::new(input.data_source, input.interval, input.version, input.partition_num);
    segment.size = input.size;
    segment.dimensions = input.dimensions;
    segment.metrics = input.metrics;
    segment.load_spec = input.load_spec;
    segment
}
