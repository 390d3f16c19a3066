use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_segcat<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_segcat"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute segcat binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_segcat(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "segcat command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn payload(value: &Value) -> &Value {
    value.get("payload").unwrap_or_else(|| panic!("missing payload in output: {value}"))
}

fn add_segment(db: &str, data_source: &str, interval: &str) -> Value {
    run_json([
        "--db",
        db,
        "segment",
        "add",
        "--data-source",
        data_source,
        "--interval",
        interval,
        "--version",
        "v1",
        "--dimension",
        "page",
        "--load-spec",
        r#"{"type":"local","path":"/tmp/segments"}"#,
    ])
}

fn seeded_db(prefix: &str) -> (PathBuf, PathBuf) {
    let dir = unique_temp_dir(prefix);
    let db = dir.join("catalog.sqlite3");
    let db_arg = path_str(&db).to_string();
    add_segment(&db_arg, "clicks", "2020-01-01T00:00:00Z/2020-01-02T00:00:00Z");
    add_segment(&db_arg, "clicks", "2020-01-02T00:00:00Z/2020-01-03T00:00:00Z");
    add_segment(&db_arg, "wikipedia", "2020-01-01T00:00:00Z/2020-01-02T00:00:00Z");
    (dir, db)
}

// Test IDs: TCLI-001
#[test]
fn cli_migrate_reports_schema_status() {
    let dir = unique_temp_dir("segcat-cli-migrate");
    let db = dir.join("catalog.sqlite3");
    let db_arg = path_str(&db);

    let dry_run = run_json(["--db", db_arg, "db", "migrate", "--dry-run"]);
    assert_eq!(dry_run.get("dry_run"), Some(&Value::Bool(true)));
    assert_eq!(dry_run.get("would_apply_versions"), Some(&serde_json::json!([1])));

    let applied = run_json(["--db", db_arg, "db", "migrate"]);
    assert_eq!(applied.get("up_to_date"), Some(&Value::Bool(true)));

    let status = run_json(["--db", db_arg, "db", "schema-version"]);
    assert_eq!(status.get("current_version").and_then(Value::as_i64), Some(1));
    assert_eq!(status.get("contract_version").and_then(Value::as_str), Some("cli.v1"));

    let integrity = run_json(["--db", db_arg, "db", "integrity-check"]);
    assert_eq!(integrity.get("quick_check_ok"), Some(&Value::Bool(true)));

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-002
#[test]
fn cli_segment_add_emits_canonical_identifier() {
    let dir = unique_temp_dir("segcat-cli-add");
    let db = dir.join("catalog.sqlite3");

    let segment = add_segment(path_str(&db), "clicks", "2020-01-01T00:00:00Z/2020-01-02T00:00:00Z");
    assert_eq!(
        segment.get("identifier").and_then(Value::as_str),
        Some("clicks_2020-01-01T00:00:00Z_2020-01-02T00:00:00Z_v1")
    );
    assert_eq!(
        segment.get("load_spec").and_then(|spec| spec.get("type")).and_then(Value::as_str),
        Some("local")
    );

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-003
#[test]
fn cli_query_datasources_respects_disabled_and_precedence() {
    let (dir, db) = seeded_db("segcat-cli-datasources");
    let db_arg = path_str(&db);

    run_json(["--db", db_arg, "datasource", "disable", "wikipedia"]);

    let names = run_json(["--db", db_arg, "query", "datasources"]);
    assert_eq!(payload(&names), &serde_json::json!(["clicks"]));

    let all = run_json(["--db", db_arg, "query", "datasources", "--full", "--include-disabled"]);
    assert_eq!(payload(&all), &serde_json::json!(["clicks", "wikipedia"]));

    let full = run_json(["--db", db_arg, "query", "datasources", "--full"]);
    let first = payload(&full).get(0).unwrap_or_else(|| panic!("empty full listing: {full}"));
    assert_eq!(first.get("name").and_then(Value::as_str), Some("clicks"));
    assert_eq!(
        first.get("segments").and_then(Value::as_array).map(Vec::len),
        Some(2)
    );

    let status = run_json(["--db", db_arg, "datasource", "status"]);
    assert_eq!(payload(&status).as_array().map(Vec::len), Some(2));

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-004
#[test]
fn cli_segment_queries_project_and_resolve() {
    let (dir, db) = seeded_db("segcat-cli-segments");
    let db_arg = path_str(&db);

    let ids = run_json(["--db", db_arg, "query", "segments", "clicks"]);
    assert_eq!(
        payload(&ids),
        &serde_json::json!([
            "clicks_2020-01-01T00:00:00Z_2020-01-02T00:00:00Z_v1",
            "clicks_2020-01-02T00:00:00Z_2020-01-03T00:00:00Z_v1"
        ])
    );

    let resolved = run_json([
        "--db",
        db_arg,
        "query",
        "resolve",
        "clicks",
        "--interval",
        "2020-01-01T12:00:00Z/2020-01-01T13:00:00Z",
    ]);
    assert_eq!(
        payload(&resolved),
        &serde_json::json!(["clicks_2020-01-01T00:00:00Z_2020-01-02T00:00:00Z_v1"])
    );

    let no_intervals = run_json(["--db", db_arg, "query", "resolve", "clicks", "--full"]);
    assert_eq!(payload(&no_intervals), &serde_json::json!([]));

    let segment = run_json([
        "--db",
        db_arg,
        "query",
        "segment",
        "clicks",
        "Clicks_2020-01-02T00:00:00Z_2020-01-03T00:00:00Z_V1",
    ]);
    assert_eq!(
        segment.get("identifier").and_then(Value::as_str),
        Some("clicks_2020-01-02T00:00:00Z_2020-01-03T00:00:00Z_v1")
    );

    run_json([
        "--db",
        db_arg,
        "segment",
        "mark-unused",
        "--id",
        "clicks_2020-01-02T00:00:00Z_2020-01-03T00:00:00Z_v1",
    ]);
    let after = run_json(["--db", db_arg, "query", "segments", "clicks"]);
    assert_eq!(payload(&after).as_array().map(Vec::len), Some(1));

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-005
#[test]
fn cli_policy_filters_and_gates_queries() {
    let (dir, db) = seeded_db("segcat-cli-policy");
    let db_arg = path_str(&db);
    let policy = dir.join("policy.yaml");
    fs::write(&policy, "anonymous_principal: guest\nprincipals:\n  analyst: [clicks]\n")
        .unwrap_or_else(|err| panic!("failed to write policy: {err}"));
    let policy_arg = path_str(&policy);

    let analyst = run_json([
        "--db",
        db_arg,
        "--policy",
        policy_arg,
        "--as",
        "analyst",
        "query",
        "datasources",
    ]);
    assert_eq!(payload(&analyst), &serde_json::json!(["clicks"]));

    let guest = run_json(["--db", db_arg, "--policy", policy_arg, "query", "datasources"]);
    assert_eq!(payload(&guest), &serde_json::json!([]));

    let denied = run_segcat([
        "--db",
        db_arg,
        "--policy",
        policy_arg,
        "--as",
        "analyst",
        "query",
        "datasource",
        "wikipedia",
    ]);
    assert!(!denied.status.success());
    let stderr = String::from_utf8_lossy(&denied.stderr);
    assert!(stderr.contains("read access denied"), "unexpected stderr: {stderr}");

    let _ = fs::remove_dir_all(&dir);
}

// Test IDs: TCLI-006
#[test]
fn cli_reports_not_found_and_invalid_intervals() {
    let (dir, db) = seeded_db("segcat-cli-errors");
    let db_arg = path_str(&db);

    let missing = run_segcat(["--db", db_arg, "query", "datasource", "nope"]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("data source not found"));

    let backwards = run_segcat([
        "--db",
        db_arg,
        "query",
        "resolve",
        "clicks",
        "--interval",
        "2021-01-01T00:00:00Z/2020-01-01T00:00:00Z",
    ]);
    assert!(!backwards.status.success());
    assert!(String::from_utf8_lossy(&backwards.stderr).contains("validation error"));

    let bad_add = run_segcat([
        "--db",
        db_arg,
        "segment",
        "add",
        "--data-source",
        "clicks",
        "--interval",
        "not-an-interval",
        "--version",
        "v1",
    ]);
    assert!(!bad_add.status.success());

    let _ = fs::remove_dir_all(&dir);
}
