//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::{EndpointSpec, ProbeType, TestConfig};

/// Batch API and UI test orchestration
#[derive(Parser, Debug)]
#[command(name = "autotester")]
#[command(version)]
#[command(about = "Run API and UI probes against many endpoints and aggregate the results")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the standard locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit endpoints, run them in-process and print the report
    Run(RunArgs),

    /// Start the HTTP API
    Serve(ServeArgs),

    /// Poll a test running on a remote server
    Poll(PollArgs),

    /// View, export and delete stored results
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Endpoint URL (repeatable)
    #[arg(short, long = "url")]
    pub urls: Vec<String>,

    /// HTTP method per --url, in order; a single method applies to all
    #[arg(short, long = "method")]
    pub methods: Vec<String>,

    /// Header for every --url endpoint, as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// JSON request body for every --url endpoint
    #[arg(long)]
    pub body: Option<String>,

    /// YAML or JSON file with a list of endpoints
    #[arg(short, long, conflicts_with = "ui")]
    pub file: Option<PathBuf>,

    /// Run UI probes against this page instead
    #[arg(long, conflicts_with = "urls")]
    pub ui: Option<String>,

    /// Job name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Probe types to skip (comma-separated, e.g. params,errorCases)
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Request budget per endpoint
    #[arg(long)]
    pub max_requests: Option<usize>,

    /// Endpoints tested at once
    #[arg(short, long)]
    pub concurrent: Option<usize>,

    /// Probe request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(long, default_value = "table")]
    pub format: String,

    /// Export the report into this directory
    #[arg(short, long)]
    pub export: Option<PathBuf>,

    /// Export format (csv, json, markdown, text)
    #[arg(long, default_value = "csv")]
    pub export_format: String,

    /// Keep results in memory only
    #[arg(long, conflicts_with = "store")]
    pub memory: bool,

    /// Job store directory
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Submit to a running server instead of testing in-process
    #[arg(long, conflicts_with_all = ["memory", "store"])]
    pub server: Option<String>,
}

/// Endpoint file: a bare list, or an object with endpoints and probe toggles
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EndpointFile {
    List(Vec<EndpointSpec>),
    Request {
        endpoints: Vec<EndpointSpec>,
        #[serde(default)]
        config: Option<TestConfig>,
        #[serde(default)]
        name: Option<String>,
    },
}

/// Endpoints and optional settings read from `--file`
#[derive(Debug, Default)]
pub struct LoadedEndpoints {
    pub endpoints: Vec<EndpointSpec>,
    pub config: Option<TestConfig>,
    pub name: Option<String>,
}

impl RunArgs {
    /// Endpoints from `--file` followed by `--url`/`--method` pairs
    pub fn endpoints(&self) -> Result<LoadedEndpoints> {
        let mut loaded = match &self.file {
            Some(path) => load_endpoint_file(path)?,
            None => LoadedEndpoints::default(),
        };

        let headers = self
            .headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<Vec<_>>>()?;
        let body = match &self.body {
            Some(raw) => Some(
                serde_json::from_str::<serde_json::Value>(raw).context("Invalid --body JSON")?,
            ),
            None => None,
        };

        for (i, url) in self.urls.iter().enumerate() {
            let method = match self.methods.len() {
                0 => "GET",
                1 => self.methods[0].as_str(),
                _ => self.methods.get(i).map(String::as_str).unwrap_or("GET"),
            };
            let mut endpoint = EndpointSpec::new(url, method);
            for (name, value) in &headers {
                endpoint = endpoint.with_header(name, value);
            }
            if let Some(body) = &body {
                endpoint = endpoint.with_body(body.clone());
            }
            loaded.endpoints.push(endpoint);
        }
        Ok(loaded)
    }

    /// Apply `--skip` and `--max-requests` on top of `base`
    pub fn test_config(&self, base: TestConfig) -> Result<TestConfig> {
        let mut config = base;
        for name in &self.skip {
            let probe = ProbeType::from_str(name.trim())
                .ok_or_else(|| anyhow::anyhow!("Unknown probe type: {name}"))?;
            config.set_probe(probe, false);
        }
        if let Some(max) = self.max_requests {
            config = config.with_max_requests(max);
        }
        Ok(config)
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Header must look like 'Name: value', got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Header name is empty in {raw:?}");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn load_endpoint_file(path: &Path) -> Result<LoadedEndpoints> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read endpoint file: {}", path.display()))?;

    let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
    let file: EndpointFile = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON endpoints: {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML endpoints: {}", path.display()))?
    };

    Ok(match file {
        EndpointFile::List(endpoints) => LoadedEndpoints {
            endpoints,
            ..Default::default()
        },
        EndpointFile::Request {
            endpoints,
            config,
            name,
        } => LoadedEndpoints {
            endpoints,
            config,
            name,
        },
    })
}

/// Arguments for serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Endpoints tested at once per job
    #[arg(short, long)]
    pub concurrent: Option<usize>,

    /// Keep results in memory only
    #[arg(long, conflicts_with = "store")]
    pub memory: bool,

    /// Job store directory
    #[arg(long)]
    pub store: Option<PathBuf>,
}

/// Arguments for poll command
#[derive(Parser, Debug)]
pub struct PollArgs {
    /// Test ID returned on submission
    pub id: String,

    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:5000")]
    pub server: String,

    /// Print the report once the test finishes
    #[arg(short, long)]
    pub report: bool,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    #[command(subcommand)]
    pub action: ResultsAction,

    /// Job store directory
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Query a running server instead of the local store
    #[arg(long, global = true, conflicts_with = "store")]
    pub server: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ResultsAction {
    /// List stored jobs, batch jobs first
    List {
        /// Output format (table, json, json-pretty, summary)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show one job's report
    Show {
        id: String,

        /// Output format (table, json, json-pretty, summary)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Delete a job
    Delete { id: String },

    /// Export a job's report
    Export {
        id: String,

        /// Export format (csv, json, markdown, text)
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// File or directory name (defaults to a generated one)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Delete finished jobs older than the given age (local store only)
    Prune {
        /// Age in hours (defaults to the configured retention)
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination (defaults to ~/.config/autotester/config.yaml)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show,

    /// List supported environment variables
    Env,
}
