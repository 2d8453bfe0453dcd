//! vigil-cli: operator and camera-agent client for the Vigil HTTP API
//!
//! # Subcommands
//! - `match <file>`: submit one encoding (raw array or `{encoding, metadata}`)
//! - `batch <file>`: submit several items (array or `{items: [...]}`)
//! - `invalidate`: drop the server's cached person registry
//! - `status`: show server health and registry summary
//! - `watch`: tail live `match_found` alerts

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8770";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(
    name = "vigil-cli",
    version,
    about = "Vigil face match client: submit encodings, manage the registry cache, tail alerts"
)]
struct Cli {
    /// Vigil HTTP server URL (overrides VIGIL_HTTP_URL env var)
    #[arg(long, env = "VIGIL_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Match a single face encoding read from a JSON file
    Match {
        file: PathBuf,

        /// Camera id attached to the capture metadata
        #[arg(long)]
        camera_id: Option<String>,
    },

    /// Match several encodings read from a JSON file
    Batch { file: PathBuf },

    /// Invalidate the server's registry cache
    Invalidate,

    /// Show server health and registry status
    Status,

    /// Stream live alerts until interrupted
    Watch,
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatchSummary {
    pub match_found: bool,
    pub person_id: Option<String>,
    pub name: Option<String>,
    pub similarity: Option<f64>,
    pub report_id: Option<String>,
    pub recorded: Option<bool>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSummary {
    pub results: Vec<MatchSummary>,
    pub total: usize,
    pub match_count: usize,
}

// ============================================================================
// Request shaping and output formatting
// ============================================================================

/// Accept either a bare encoding array or a full `{encoding, metadata}` object.
pub fn match_body(input: Value, camera_id: Option<&str>) -> anyhow::Result<Value> {
    let mut body = match input {
        Value::Array(_) => serde_json::json!({ "encoding": input }),
        Value::Object(_) => input,
        _ => bail!("expected an encoding array or an object with an `encoding` field"),
    };

    if let Some(camera_id) = camera_id {
        let metadata = body
            .as_object_mut()
            .map(|o| o.entry("metadata").or_insert_with(|| serde_json::json!({})));
        if let Some(Value::Object(m)) = metadata {
            m.insert("cameraId".to_string(), Value::String(camera_id.to_string()));
        }
    }
    Ok(body)
}

/// Accept an array of items or `{items}` / `{encodings}`.
pub fn batch_body(input: Value) -> anyhow::Result<Value> {
    let items = match input {
        Value::Array(items) => items,
        Value::Object(mut o) => match o.remove("items").or_else(|| o.remove("encodings")) {
            Some(Value::Array(items)) => items,
            _ => bail!("expected an `items` array"),
        },
        _ => bail!("expected an array of items"),
    };

    let items = items
        .into_iter()
        .map(|item| match item {
            Value::Array(_) => serde_json::json!({ "encoding": item }),
            other => other,
        })
        .collect::<Vec<_>>();
    Ok(serde_json::json!({ "items": items }))
}

pub fn format_match(m: &MatchSummary) -> String {
    if let Some(error) = &m.error {
        if !m.match_found {
            return format!("error: {}", error);
        }
    }
    if !m.match_found {
        return m
            .message
            .clone()
            .unwrap_or_else(|| "No match".to_string());
    }

    let mut line = format!(
        "MATCH {} ({}) similarity {:.1}%",
        m.name.as_deref().unwrap_or("?"),
        m.person_id.as_deref().unwrap_or("?"),
        m.similarity.unwrap_or(0.0) * 100.0
    );
    match (&m.report_id, m.recorded) {
        (Some(id), _) => line.push_str(&format!(" report {}", id)),
        (None, Some(false)) => line.push_str(" NOT RECORDED"),
        _ => {}
    }
    line
}

/// One line per `match_found` event payload.
pub fn format_alert(data: &Value) -> String {
    format!(
        "[{}] {} at {} ({}) similarity {:.1}% report {}",
        data["timestamp"].as_str().unwrap_or("?"),
        data["personName"].as_str().unwrap_or("?"),
        data["cameraName"].as_str().unwrap_or("?"),
        data["cameraLocation"].as_str().unwrap_or("?"),
        data["similarity"].as_f64().unwrap_or(0.0) * 100.0,
        data["reportId"].as_str().unwrap_or("?"),
    )
}

/// Extract the JSON payload of a `data:` line, if any.
pub fn sse_data(line: &str) -> Option<Value> {
    let payload = line.strip_prefix("data:")?.trim_start();
    serde_json::from_str(payload).ok()
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

fn client(timeout_secs: Option<u64>) -> anyhow::Result<reqwest::blocking::Client> {
    let builder = reqwest::blocking::Client::builder();
    let builder = match timeout_secs {
        Some(s) => builder.timeout(std::time::Duration::from_secs(s)),
        None => builder.timeout(None::<std::time::Duration>),
    };
    Ok(builder.build()?)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn send_json(
    request: reqwest::blocking::RequestBuilder,
    url: &str,
) -> anyhow::Result<(reqwest::StatusCode, Value)> {
    let resp = request
        .send()
        .with_context(|| format!("connection failed to {}", url))?;
    let status = resp.status();
    let body: Value = resp.json().unwrap_or_default();
    Ok((status, body))
}

fn do_match(server: &str, file: &Path, camera_id: Option<&str>, json: bool) -> anyhow::Result<()> {
    let body = match_body(read_json(file)?, camera_id)?;
    let url = format!("{}/api/recognition", server);
    let (status, resp) = send_json(client(Some(30))?.post(&url).json(&body), &url)?;

    if !status.is_success() {
        bail!("server returned {}: {}", status, resp_error(&resp));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        let summary: MatchSummary = serde_json::from_value(resp)?;
        println!("{}", format_match(&summary));
    }
    Ok(())
}

fn do_batch(server: &str, file: &Path, json: bool) -> anyhow::Result<()> {
    let body = batch_body(read_json(file)?)?;
    let url = format!("{}/api/recognition/batch", server);
    let (status, resp) = send_json(client(Some(120))?.post(&url).json(&body), &url)?;

    if !status.is_success() {
        bail!("server returned {}: {}", status, resp_error(&resp));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    let summary: BatchSummary = serde_json::from_value(resp)?;
    for (i, m) in summary.results.iter().enumerate() {
        println!("{:>3}: {}", i, format_match(m));
    }
    println!("{} of {} matched", summary.match_count, summary.total);
    Ok(())
}

fn do_invalidate(server: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/registry/invalidate", server);
    let (status, resp) = send_json(client(Some(10))?.post(&url), &url)?;
    if !status.is_success() {
        bail!("server returned {}: {}", status, resp_error(&resp));
    }
    println!("Registry cache invalidated");
    Ok(())
}

/// Show the server status by calling GET /health and GET /api/registry.
fn do_status(server: &str, json: bool) -> anyhow::Result<()> {
    let http = client(Some(10))?;

    let health_url = format!("{}/health", server);
    let (status, health) = send_json(http.get(&health_url), &health_url)?;
    if !status.is_success() {
        bail!("server unhealthy (HTTP {})", status);
    }

    let registry_url = format!("{}/api/registry", server);
    let (_, registry) = send_json(http.get(&registry_url), &registry_url)?;

    if json {
        let combined = serde_json::json!({ "health": health, "registry": registry });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    println!("Vigil server: {}", health["status"].as_str().unwrap_or("unknown"));
    println!("Version:      {}", health["version"].as_str().unwrap_or("?"));
    println!("PostgreSQL:   {}", health["postgresql"].as_str().unwrap_or("?"));
    println!("pgvector:     {}", health["pgvector"].as_str().unwrap_or("?"));
    println!("Persons:      {}", registry["persons"]);
    println!("Embeddings:   {}", registry["embeddings"]);
    println!("Threshold:    {}", registry["threshold"]);
    println!(
        "Snapshot age: {:.1}s (ttl {}s)",
        registry["ageSeconds"].as_f64().unwrap_or(0.0),
        registry["ttlSeconds"]
    );
    Ok(())
}

fn do_watch(server: &str, json: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/alerts/stream", server);
    let resp = client(None)?
        .get(&url)
        .header("accept", "text/event-stream")
        .send()
        .with_context(|| format!("connection failed to {}", url))?;

    if !resp.status().is_success() {
        bail!("server returned {}", resp.status());
    }
    eprintln!("Watching {} (Ctrl+C to stop)", url);

    for line in BufReader::new(resp).lines() {
        let line = line?;
        let Some(data) = sse_data(&line) else {
            continue;
        };
        if json {
            println!("{}", data);
        } else {
            println!("{}", format_alert(&data));
        }
    }
    Ok(())
}

fn resp_error(body: &Value) -> String {
    body["error"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();

    let result = match &cli.command {
        Commands::Match { file, camera_id } => {
            do_match(&server, file, camera_id.as_deref(), cli.json)
        }
        Commands::Batch { file } => do_batch(&server, file, cli.json),
        Commands::Invalidate => do_invalidate(&server),
        Commands::Status => do_status(&server, cli.json),
        Commands::Watch => do_watch(&server, cli.json),
    };

    if let Err(e) = result {
        eprintln!("vigil-cli: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
