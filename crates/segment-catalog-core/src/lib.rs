use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, warn};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CatalogError {
    #[error("data source not found: {0}")]
    DataSourceNotFound(String),
    #[error("segment not found: {segment_id} in data source {data_source}")]
    SegmentNotFound { data_source: String, segment_id: String },
    #[error("read access denied for data source: {0}")]
    Forbidden(String),
    #[error("inventory error: {0}")]
    Inventory(String),
    #[error("interval resolver error: {0}")]
    Resolver(String),
    #[error("authorization error: {0}")]
    Authorization(String),
    #[error("validation error: {0}")]
    Validation(String),
}

impl CatalogError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DataSourceNotFound(_) | Self::SegmentNotFound { .. })
    }

    /// True when the failure came from a collaborator rather than the request itself.
    #[must_use]
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(self, Self::Inventory(_) | Self::Resolver(_) | Self::Authorization(_))
    }
}

/// Half-open `[start, end)` span of UTC instants.
///
/// The textual form is `<rfc3339 start>/<rfc3339 end>`, e.g.
/// `2020-01-01T00:00:00Z/2021-01-01T00:00:00Z`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Interval {
    start: OffsetDateTime,
    end: OffsetDateTime,
}

impl Interval {
    /// Build an interval, normalizing both endpoints to UTC.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] when `start` is after `end` or either endpoint
    /// falls outside the years representable in RFC 3339 (0000..=9999).
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self, CatalogError> {
        let start = start.to_offset(UtcOffset::UTC);
        let end = end.to_offset(UtcOffset::UTC);
        if start > end {
            return Err(CatalogError::Validation(format!(
                "interval start MUST NOT be after end (start={start}, end={end})"
            )));
        }
        for endpoint in [start, end] {
            if !(0..=9999).contains(&endpoint.year()) {
                return Err(CatalogError::Validation(format!(
                    "interval endpoint year {} is outside 0000..=9999",
                    endpoint.year()
                )));
            }
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    #[must_use]
    pub fn end(&self) -> OffsetDateTime {
        self.end
    }

    #[must_use]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let start = self.start.format(&Rfc3339).map_err(|_| std::fmt::Error)?;
        let end = self.end.format(&Rfc3339).map_err(|_| std::fmt::Error)?;
        write!(f, "{start}/{end}")
    }
}

impl FromStr for Interval {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((raw_start, raw_end)) = value.trim().split_once('/') else {
            return Err(CatalogError::Validation(format!(
                "interval MUST be formatted as <start>/<end>: {value}"
            )));
        };
        let start = OffsetDateTime::parse(raw_start, &Rfc3339).map_err(|err| {
            CatalogError::Validation(format!("invalid interval start `{raw_start}`: {err}"))
        })?;
        let end = OffsetDateTime::parse(raw_end, &Rfc3339).map_err(|err| {
            CatalogError::Validation(format!("invalid interval end `{raw_end}`: {err}"))
        })?;
        Self::new(start, end)
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Segment {
    pub identifier: String,
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

impl Segment {
    /// New segment carrying its canonical identifier and empty metadata.
    #[must_use]
    pub fn new(
        data_source: impl Into<String>,
        interval: Interval,
        version: impl Into<String>,
        partition_num: u32,
    ) -> Self {
        let data_source = data_source.into();
        let version = version.into();
        Self {
            identifier: canonical_segment_identifier(&data_source, &interval, &version, partition_num),
            data_source,
            interval,
            version,
            partition_num,
            size: 0,
            dimensions: Vec::new(),
            metrics: Vec::new(),
            load_spec: serde_json::Map::new(),
        }
    }

    /// Case-insensitive identifier comparison.
    #[must_use]
    pub fn matches_identifier(&self, candidate: &str) -> bool {
        identifiers_match(&self.identifier, candidate)
    }

    /// # Errors
    /// Returns [`CatalogError::Validation`] when required fields are blank or the
    /// segment belongs to a different data source than `expected_data_source`.
    pub fn validate(&self, expected_data_source: &str) -> Result<(), CatalogError> {
        if self.data_source.trim().is_empty() {
            return Err(CatalogError::Validation("segment data source MUST be provided".to_string()));
        }
        if self.identifier.trim().is_empty() {
            return Err(CatalogError::Validation("segment identifier MUST be provided".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(CatalogError::Validation("segment version MUST be provided".to_string()));
        }
        if self.data_source != expected_data_source {
            return Err(CatalogError::Validation(format!(
                "segment {} belongs to data source {}, not {expected_data_source}",
                self.identifier, self.data_source
            )));
        }
        Ok(())
    }
}

/// `{data_source}_{start}_{end}_{version}`, plus `_{partition_num}` for non-zero partitions.
#[must_use]
pub fn canonical_segment_identifier(
    data_source: &str,
    interval: &Interval,
    version: &str,
    partition_num: u32,
) -> String {
    let (start, end) = match interval.to_string().split_once('/') {
        Some((start, end)) => (start.to_string(), end.to_string()),
        None => (String::new(), String::new()),
    };
    let mut identifier = format!("{data_source}_{start}_{end}_{version}");
    if partition_num != 0 {
        identifier.push('_');
        identifier.push_str(&partition_num.to_string());
    }
    identifier
}

fn identifiers_match(stored: &str, requested: &str) -> bool {
    stored.eq_ignore_ascii_case(requested)
        || stored.chars().flat_map(char::to_lowercase).eq(requested.chars().flat_map(char::to_lowercase))
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DataSource {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl DataSource {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), properties: BTreeMap::new(), segments: Vec::new() }
    }

    #[must_use]
    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = segments;
        self
    }

    /// First segment whose identifier matches `segment_id` ignoring case.
    #[must_use]
    pub fn find_segment(&self, segment_id: &str) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.matches_identifier(segment_id))
    }
}

/// Opaque requester principal, forwarded untouched to the authorization filter.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RequesterIdentity(String);

impl RequesterIdentity {
    #[must_use]
    pub fn new(principal: impl Into<String>) -> Self {
        Self(principal.into())
    }

    #[must_use]
    pub fn principal(&self) -> &str {
        &self.0
    }
}

impl Display for RequesterIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ResourceType {
    #[serde(rename = "DATASOURCE")]
    DataSource,
}

impl ResourceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataSource => "DATASOURCE",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Read,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceAction {
    pub resource: Resource,
    pub action: Action,
}

impl ResourceAction {
    #[must_use]
    pub fn data_source_read(name: impl Into<String>) -> Self {
        Self {
            resource: Resource { name: name.into(), resource_type: ResourceType::DataSource },
            action: Action::Read,
        }
    }
}

/// Maps a resource name to the resource-actions that must all be allowed.
pub trait ResourceActionGenerator {
    fn resource_actions(&self, resource_name: &str) -> Vec<ResourceAction>;
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DataSourceReadActions;

impl ResourceActionGenerator for DataSourceReadActions {
    fn resource_actions(&self, resource_name: &str) -> Vec<ResourceAction> {
        vec![ResourceAction::data_source_read(resource_name)]
    }
}

/// Batch authorization over a candidate set.
///
/// Implementations return the names from `candidates` the identity may read. Callers
/// MUST still treat the result as untrusted and intersect it with `candidates`.
pub trait AuthorizationFilter {
    /// # Errors
    /// Returns [`CatalogError::Authorization`] when the decision procedure itself fails.
    fn filter_authorized(
        &self,
        identity: &RequesterIdentity,
        candidates: &[String],
        generator: &dyn ResourceActionGenerator,
    ) -> Result<Vec<String>, CatalogError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Allow,
    Deny,
}

/// Single `(identity, resource-action)` decision.
pub trait Authorizer {
    /// # Errors
    /// Returns [`CatalogError::Authorization`] when no decision can be made.
    fn authorize(
        &self,
        identity: &RequesterIdentity,
        resource_action: &ResourceAction,
    ) -> Result<Access, CatalogError>;
}

/// [`AuthorizationFilter`] asking an [`Authorizer`] about every generated resource-action.
///
/// A resource passes only when the generator yields at least one action and every action
/// is allowed. Decisions are memoized for the duration of one call.
#[derive(Debug, Clone)]
pub struct PerResourceFilter<A> {
    authorizer: A,
}

impl<A> PerResourceFilter<A> {
    #[must_use]
    pub fn new(authorizer: A) -> Self {
        Self { authorizer }
    }

    #[must_use]
    pub fn authorizer(&self) -> &A {
        &self.authorizer
    }
}

impl<A: Authorizer> AuthorizationFilter for PerResourceFilter<A> {
    fn filter_authorized(
        &self,
        identity: &RequesterIdentity,
        candidates: &[String],
        generator: &dyn ResourceActionGenerator,
    ) -> Result<Vec<String>, CatalogError> {
        let mut decisions: HashMap<ResourceAction, Access> = HashMap::new();
        let mut permitted = Vec::new();

        'candidates: for name in candidates {
            let resource_actions = generator.resource_actions(name);
            if resource_actions.is_empty() {
                continue;
            }

            for resource_action in resource_actions {
                let access = match decisions.get(&resource_action) {
                    Some(access) => *access,
                    None => {
                        let access = self.authorizer.authorize(identity, &resource_action)?;
                        decisions.insert(resource_action, access);
                        access
                    }
                };
                if access == Access::Deny {
                    continue 'candidates;
                }
            }
            permitted.push(name.clone());
        }

        Ok(permitted)
    }
}

/// Upstream per-datasource gate placed in front of the single-datasource operations.
///
/// # Errors
/// Returns [`CatalogError::Forbidden`] when `identity` may not read `data_source`, or the
/// filter's own error when it fails.
pub fn ensure_data_source_readable(
    filter: &dyn AuthorizationFilter,
    identity: &RequesterIdentity,
    data_source: &str,
) -> Result<(), CatalogError> {
    let candidates = [data_source.to_string()];
    let permitted = filter.filter_authorized(identity, &candidates, &DataSourceReadActions)?;
    if permitted.iter().any(|name| name == data_source) {
        return Ok(());
    }
    warn!(principal = identity.principal(), data_source, "data source read denied");
    Err(CatalogError::Forbidden(data_source.to_string()))
}

/// Current view of data sources and their loaded segments.
pub trait InventoryProvider {
    /// Data sources present in the snapshot, in snapshot order.
    ///
    /// # Errors
    /// Returns [`CatalogError::Inventory`] when the snapshot cannot be read.
    fn inventory(&self) -> Result<Vec<DataSource>, CatalogError>;

    /// Names of the data sources present in the snapshot, without their segments.
    ///
    /// # Errors
    /// Returns [`CatalogError::Inventory`] when the snapshot cannot be read.
    fn data_source_names(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.inventory()?.into_iter().map(|data_source| data_source.name).collect())
    }

    /// # Errors
    /// Returns [`CatalogError::Inventory`] when the snapshot cannot be read.
    fn inventory_value(&self, name: &str) -> Result<Option<DataSource>, CatalogError>;

    /// Every known data source name, enabled or disabled.
    ///
    /// # Errors
    /// Returns [`CatalogError::Inventory`] when the registry cannot be read.
    fn all_data_source_names(&self) -> Result<Vec<String>, CatalogError>;
}

/// Durable lookup of used segments by time interval.
///
/// Contract: a segment is returned when it overlaps at least one of `intervals`; an empty
/// `intervals` slice therefore matches nothing. Unknown data sources yield an empty result.
pub trait SegmentIntervalResolver {
    /// # Errors
    /// Returns [`CatalogError::Resolver`] when the backing storage fails.
    fn used_segments_for_intervals(
        &self,
        data_source: &str,
        intervals: &[Interval],
    ) -> Result<Vec<Segment>, CatalogError>;
}

/// In-memory inventory snapshot: loaded data sources plus the full known-name registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    data_sources: Vec<DataSource>,
    known_names: BTreeSet<String>,
}

impl InventorySnapshot {
    /// Names of `data_sources` are always added to the known-name registry.
    ///
    /// # Errors
    /// Returns [`CatalogError::Validation`] on duplicate data source names, duplicate
    /// segment identifiers within a data source, or segments filed under the wrong
    /// data source.
    pub fn new(
        data_sources: Vec<DataSource>,
        known_names: impl IntoIterator<Item = String>,
    ) -> Result<Self, CatalogError> {
        let mut known_names = known_names.into_iter().collect::<BTreeSet<_>>();
        let mut seen = BTreeSet::new();
        for data_source in &data_sources {
            if !seen.insert(data_source.name.as_str()) {
                return Err(CatalogError::Validation(format!(
                    "duplicate data source in snapshot: {}",
                    data_source.name
                )));
            }
            let mut identifiers = BTreeSet::new();
            for segment in &data_source.segments {
                segment.validate(&data_source.name)?;
                if !identifiers.insert(segment.identifier.as_str()) {
                    return Err(CatalogError::Validation(format!(
                        "duplicate segment identifier {} in data source {}",
                        segment.identifier, data_source.name
                    )));
                }
            }
            known_names.insert(data_source.name.clone());
        }
        Ok(Self { data_sources, known_names })
    }

    #[must_use]
    pub fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }

    #[must_use]
    pub fn known_names(&self) -> &BTreeSet<String> {
        &self.known_names
    }
}

impl InventoryProvider for InventorySnapshot {
    fn inventory(&self) -> Result<Vec<DataSource>, CatalogError> {
        Ok(self.data_sources.clone())
    }

    fn data_source_names(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.data_sources.iter().map(|data_source| data_source.name.clone()).collect())
    }

    fn inventory_value(&self, name: &str) -> Result<Option<DataSource>, CatalogError> {
        Ok(self.data_sources.iter().find(|data_source| data_source.name == name).cloned())
    }

    fn all_data_source_names(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.known_names.iter().cloned().collect())
    }
}

impl SegmentIntervalResolver for InventorySnapshot {
    fn used_segments_for_intervals(
        &self,
        data_source: &str,
        intervals: &[Interval],
    ) -> Result<Vec<Segment>, CatalogError> {
        let Some(found) = self.data_sources.iter().find(|candidate| candidate.name == data_source)
        else {
            return Ok(Vec::new());
        };
        Ok(found
            .segments
            .iter()
            .filter(|segment| intervals.iter().any(|interval| segment.interval.overlaps(interval)))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SegmentProjection {
    Full,
    Identifiers,
}

impl SegmentProjection {
    #[must_use]
    pub fn from_full_flag(full: bool) -> Self {
        if full {
            Self::Full
        } else {
            Self::Identifiers
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum SegmentEntry<'a> {
    Full(&'a Segment),
    Identifier(&'a str),
}

impl SegmentEntry<'_> {
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Full(segment) => &segment.identifier,
            Self::Identifier(identifier) => identifier,
        }
    }
}

/// Owned segments plus a projection applied lazily on every pass.
///
/// `iter` can be called any number of times and always restarts from the first segment.
/// Serializes as a JSON array of segment objects or identifier strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentListing {
    segments: Vec<Segment>,
    projection: SegmentProjection,
}

impl SegmentListing {
    #[must_use]
    pub fn new(segments: Vec<Segment>, projection: SegmentProjection) -> Self {
        Self { segments, projection }
    }

    #[must_use]
    pub fn empty(projection: SegmentProjection) -> Self {
        Self::new(Vec::new(), projection)
    }

    #[must_use]
    pub fn projection(&self) -> SegmentProjection {
        self.projection
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> SegmentListingIter<'_> {
        SegmentListingIter { inner: self.segments.iter(), projection: self.projection }
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.segments.iter().map(|segment| segment.identifier.as_str())
    }

    #[must_use]
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}

impl<'a> IntoIterator for &'a SegmentListing {
    type Item = SegmentEntry<'a>;
    type IntoIter = SegmentListingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for SegmentListing {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[derive(Debug, Clone)]
pub struct SegmentListingIter<'a> {
    inner: std::slice::Iter<'a, Segment>,
    projection: SegmentProjection,
}

impl<'a> Iterator for SegmentListingIter<'a> {
    type Item = SegmentEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.inner.next()?;
        Some(match self.projection {
            SegmentProjection::Full => SegmentEntry::Full(segment),
            SegmentProjection::Identifiers => SegmentEntry::Identifier(&segment.identifier),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for SegmentListingIter<'_> {}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ListDataSourcesOptions {
    #[serde(default)]
    pub full: bool,
    #[serde(default)]
    pub include_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum DataSourceListing {
    Names(Vec<String>),
    Full(Vec<DataSource>),
}

impl DataSourceListing {
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Names(names) => names.iter().map(String::as_str).collect(),
            Self::Full(data_sources) => {
                data_sources.iter().map(|data_source| data_source.name.as_str()).collect()
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Names(names) => names.len(),
            Self::Full(data_sources) => data_sources.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Authorization-filtered read operations over the segment catalog.
///
/// Holds only borrowed collaborators. The single-datasource operations assume the caller
/// already passed [`ensure_data_source_readable`].
#[derive(Clone, Copy)]
pub struct CatalogQueryService<'a> {
    inventory: &'a dyn InventoryProvider,
    resolver: &'a dyn SegmentIntervalResolver,
    authorization: &'a dyn AuthorizationFilter,
}

impl<'a> CatalogQueryService<'a> {
    #[must_use]
    pub fn new(
        inventory: &'a dyn InventoryProvider,
        resolver: &'a dyn SegmentIntervalResolver,
        authorization: &'a dyn AuthorizationFilter,
    ) -> Self {
        Self { inventory, resolver, authorization }
    }

    /// List the data sources `identity` may read.
    ///
    /// `include_disabled` takes precedence over `full`: when both are set the result is the
    /// plain name set.
    ///
    /// # Errors
    /// Propagates inventory and authorization failures.
    pub fn list_data_sources(
        &self,
        options: ListDataSourcesOptions,
        identity: &RequesterIdentity,
    ) -> Result<DataSourceListing, CatalogError> {
        let (candidates, inventory) = if options.include_disabled {
            (self.inventory.all_data_source_names()?, None)
        } else if !options.full {
            (self.inventory.data_source_names()?, None)
        } else {
            let inventory = self.inventory.inventory()?;
            let names = inventory.iter().map(|data_source| data_source.name.clone()).collect();
            (names, Some(inventory))
        };

        let permitted = self.authorize_names(identity, candidates)?;

        match (options.full, inventory) {
            (true, Some(inventory)) => {
                let data_sources = inventory
                    .into_iter()
                    .filter(|data_source| permitted.binary_search(&data_source.name).is_ok())
                    .collect::<Vec<_>>();
                debug!(count = data_sources.len(), "listed full data sources");
                Ok(DataSourceListing::Full(data_sources))
            }
            _ => {
                debug!(
                    count = permitted.len(),
                    include_disabled = options.include_disabled,
                    "listed data source names"
                );
                Ok(DataSourceListing::Names(permitted))
            }
        }
    }

    /// # Errors
    /// Returns [`CatalogError::DataSourceNotFound`] when `name` is absent from the snapshot.
    pub fn get_data_source(&self, name: &str) -> Result<DataSource, CatalogError> {
        self.inventory
            .inventory_value(name)?
            .ok_or_else(|| CatalogError::DataSourceNotFound(name.to_string()))
    }

    /// # Errors
    /// Returns [`CatalogError::DataSourceNotFound`] when `name` is absent from the snapshot.
    pub fn list_segments(&self, name: &str, full: bool) -> Result<SegmentListing, CatalogError> {
        let data_source = self.get_data_source(name)?;
        debug!(data_source = name, segments = data_source.segments.len(), full, "listed segments");
        Ok(SegmentListing::new(data_source.segments, SegmentProjection::from_full_flag(full)))
    }

    /// Used segments overlapping any of `intervals`. Unknown data sources give an empty
    /// listing rather than a not-found error.
    ///
    /// # Errors
    /// Propagates resolver failures.
    pub fn resolve_segments_by_intervals(
        &self,
        name: &str,
        intervals: &[Interval],
        full: bool,
    ) -> Result<SegmentListing, CatalogError> {
        let segments = self.resolver.used_segments_for_intervals(name, intervals)?;
        debug!(
            data_source = name,
            intervals = intervals.len(),
            segments = segments.len(),
            full,
            "resolved segments by interval"
        );
        Ok(SegmentListing::new(segments, SegmentProjection::from_full_flag(full)))
    }

    /// # Errors
    /// Returns [`CatalogError::DataSourceNotFound`] or [`CatalogError::SegmentNotFound`].
    pub fn get_segment(&self, name: &str, segment_id: &str) -> Result<Segment, CatalogError> {
        let data_source = self.get_data_source(name)?;
        data_source.segments.into_iter().find(|segment| segment.matches_identifier(segment_id)).ok_or_else(
            || CatalogError::SegmentNotFound {
                data_source: name.to_string(),
                segment_id: segment_id.to_string(),
            },
        )
    }

    fn authorize_names(
        &self,
        identity: &RequesterIdentity,
        mut candidates: Vec<String>,
    ) -> Result<Vec<String>, CatalogError> {
        candidates.sort();
        candidates.dedup();

        let answered =
            self.authorization.filter_authorized(identity, &candidates, &DataSourceReadActions)?;

        let mut permitted = Vec::with_capacity(answered.len());
        for name in answered {
            if candidates.binary_search(&name).is_ok() {
                permitted.push(name);
            } else {
                warn!(data_source = %name, "authorization filter returned a name outside the candidate set");
            }
        }
        permitted.sort();
        permitted.dedup();
        Ok(permitted)
    }
}
