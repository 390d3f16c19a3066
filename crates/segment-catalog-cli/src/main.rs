use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use segment_catalog_api::{
    parse_intervals, AccessPolicy, RegisterSegmentRequest, SegmentCatalogApi,
};
use segment_catalog_core::{Interval, ListDataSourcesOptions, RequesterIdentity};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "segcat")]
#[command(about = "Segment catalog CLI")]
struct Cli {
    #[arg(long, default_value = "./segment_catalog.sqlite3")]
    db: PathBuf,

    /// YAML access policy applied to queries; every read is allowed when omitted.
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Principal to query as; defaults to the policy's anonymous principal.
    #[arg(long = "as")]
    principal: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Segment {
        #[command(subcommand)]
        command: Box<SegmentCommand>,
    },
    Datasource {
        #[command(subcommand)]
        command: DatasourceCommand,
    },
    Query {
        #[command(subcommand)]
        command: QueryCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum SegmentCommand {
    Add(AddSegmentArgs),
    MarkUnused(MarkUnusedArgs),
}

#[derive(Debug, Args)]
struct AddSegmentArgs {
    #[arg(long)]
    data_source: String,
    /// `<rfc3339 start>/<rfc3339 end>`
    #[arg(long)]
    interval: Interval,
    #[arg(long)]
    version: String,
    #[arg(long, default_value_t = 0)]
    partition: u32,
    #[arg(long, default_value_t = 0)]
    size: u64,
    #[arg(long = "dimension")]
    dimensions: Vec<String>,
    #[arg(long = "metric")]
    metrics: Vec<String>,
    /// Opaque JSON object describing where the segment lives.
    #[arg(long)]
    load_spec: Option<String>,
}

#[derive(Debug, Args)]
struct MarkUnusedArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Subcommand)]
enum DatasourceCommand {
    Enable(DatasourceNameArgs),
    Disable(DatasourceNameArgs),
    Status,
}

#[derive(Debug, Args)]
struct DatasourceNameArgs {
    name: String,
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    Datasources(ListDatasourcesArgs),
    Datasource(DatasourceNameArgs),
    Segments(ListSegmentsArgs),
    Resolve(ResolveArgs),
    Segment(GetSegmentArgs),
}

#[derive(Debug, Args)]
struct ListDatasourcesArgs {
    #[arg(long, default_value_t = false)]
    full: bool,
    #[arg(long, default_value_t = false)]
    include_disabled: bool,
}

#[derive(Debug, Args)]
struct ListSegmentsArgs {
    name: String,
    #[arg(long, default_value_t = false)]
    full: bool,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    name: String,
    /// Repeatable; no intervals resolves to an empty listing.
    #[arg(long = "interval")]
    intervals: Vec<String>,
    #[arg(long, default_value_t = false)]
    full: bool,
}

#[derive(Debug, Args)]
struct GetSegmentArgs {
    name: String,
    segment_id: String,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut api = SegmentCatalogApi::new(cli.db.clone());
    if let Some(policy_path) = &cli.policy {
        api = api.with_policy(&AccessPolicy::load(policy_path)?);
    }
    debug!(db = %cli.db.display(), "opened segment catalog");

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Segment { command } => run_segment(*command, &api),
        Command::Datasource { command } => run_datasource(command, &api),
        Command::Query { command } => {
            let identity = api.identity(cli.principal.as_deref());
            run_query(command, &api, &identity)
        }
    }
}

fn run_db(command: DbCommand, api: &SegmentCatalogApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn run_segment(command: SegmentCommand, api: &SegmentCatalogApi) -> Result<()> {
    match command {
        SegmentCommand::Add(args) => {
            let load_spec = match args.load_spec.as_deref() {
                Some(raw) => serde_json::from_str(raw).context("--load-spec MUST be a JSON object")?,
                None => serde_json::Map::new(),
            };
            let segment = api.register_segment(RegisterSegmentRequest {
                data_source: args.data_source,
                interval: args.interval,
                version: args.version,
                partition_num: args.partition,
                size: args.size,
                dimensions: args.dimensions,
                metrics: args.metrics,
                load_spec,
            })?;
            emit_json(serde_json::to_value(&segment).context("failed to serialize segment")?)
        }
        SegmentCommand::MarkUnused(args) => {
            let result = api.mark_segment_unused(&args.id)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize segment usage")?)
        }
    }
}

fn run_datasource(command: DatasourceCommand, api: &SegmentCatalogApi) -> Result<()> {
    let result = match command {
        DatasourceCommand::Enable(args) => {
            serde_json::to_value(api.set_data_source_enabled(&args.name, true)?)
        }
        DatasourceCommand::Disable(args) => {
            serde_json::to_value(api.set_data_source_enabled(&args.name, false)?)
        }
        DatasourceCommand::Status => serde_json::to_value(api.data_source_statuses()?),
    };
    emit_json(result.context("failed to serialize data source result")?)
}

fn run_query(
    command: QueryCommand,
    api: &SegmentCatalogApi,
    identity: &RequesterIdentity,
) -> Result<()> {
    let value = match command {
        QueryCommand::Datasources(args) => {
            let options =
                ListDataSourcesOptions { full: args.full, include_disabled: args.include_disabled };
            serde_json::to_value(api.list_data_sources(identity, options)?)
        }
        QueryCommand::Datasource(args) => {
            serde_json::to_value(api.get_data_source(identity, &args.name)?)
        }
        QueryCommand::Segments(args) => {
            serde_json::to_value(api.list_segments(identity, &args.name, args.full)?)
        }
        QueryCommand::Resolve(args) => {
            let intervals = parse_intervals(&args.intervals)?;
            serde_json::to_value(api.resolve_segments(identity, &args.name, &intervals, args.full)?)
        }
        QueryCommand::Segment(args) => {
            serde_json::to_value(api.get_segment(identity, &args.name, &args.segment_id)?)
        }
    };
    emit_json(value.context("failed to serialize query result")?)
}
