use criterion::{criterion_group, criterion_main, Criterion};
use segment_catalog_core::{
    Access, AuthorizationFilter, Authorizer, CatalogError, CatalogQueryService, DataSource,
    Interval, InventorySnapshot, ListDataSourcesOptions, PerResourceFilter, RequesterIdentity,
    ResourceAction, Segment,
};
use time::{Duration, OffsetDateTime};

struct EvenOnly;

impl Authorizer for EvenOnly {
    fn authorize(
        &self,
        _identity: &RequesterIdentity,
        resource_action: &ResourceAction,
    ) -> Result<Access, CatalogError> {
        let even = resource_action
            .resource
            .name
            .bytes()
            .last()
            .is_some_and(|digit| (digit - b'0') % 2 == 0);
        Ok(if even { Access::Allow } else { Access::Deny })
    }
}

fn mk_snapshot(data_sources: usize, segments_per_source: i64) -> InventorySnapshot {
    let data_sources = (0..data_sources)
        .map(|index| {
            let name = format!("ds_{index:04}");
            let segments = (0..segments_per_source)
                .map(|day| {
                    let start = OffsetDateTime::UNIX_EPOCH + Duration::days(day);
                    let interval = match Interval::new(start, start + Duration::days(1)) {
                        Ok(interval) => interval,
                        Err(err) => panic!("benchmark interval failed: {err}"),
                    };
                    Segment::new(name.clone(), interval, "v1", 0)
                })
                .collect();
            DataSource::new(name).with_segments(segments)
        })
        .collect();
    match InventorySnapshot::new(data_sources, Vec::new()) {
        Ok(snapshot) => snapshot,
        Err(err) => panic!("benchmark snapshot failed: {err}"),
    }
}

fn bench_listing(c: &mut Criterion) {
    let snapshot = mk_snapshot(500, 20);
    let filter = PerResourceFilter::new(EvenOnly);
    let authorization: &dyn AuthorizationFilter = &filter;
    let service = CatalogQueryService::new(&snapshot, &snapshot, authorization);
    let identity = RequesterIdentity::new("bench");

    c.bench_function("list_data_source_names_500", |b| {
        b.iter(|| {
            if let Err(err) = service.list_data_sources(ListDataSourcesOptions::default(), &identity)
            {
                panic!("name listing failed: {err}");
            }
        });
    });

    c.bench_function("list_full_data_sources_500", |b| {
        b.iter(|| {
            let options = ListDataSourcesOptions { full: true, include_disabled: false };
            if let Err(err) = service.list_data_sources(options, &identity) {
                panic!("full listing failed: {err}");
            }
        });
    });
}

fn bench_identifier_projection(c: &mut Criterion) {
    let snapshot = mk_snapshot(1, 5_000);
    let filter = PerResourceFilter::new(EvenOnly);
    let service = CatalogQueryService::new(&snapshot, &snapshot, &filter);

    c.bench_function("serialize_identifier_projection_5000", |b| {
        b.iter(|| {
            let listing = match service.list_segments("ds_0000", false) {
                Ok(listing) => listing,
                Err(err) => panic!("segment listing failed: {err}"),
            };
            if let Err(err) = serde_json::to_vec(&listing) {
                panic!("listing serialization failed: {err}");
            }
        });
    });
}

criterion_group!(listing_benches, bench_listing, bench_identifier_projection);
criterion_main!(listing_benches);
