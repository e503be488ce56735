//! # QueryGate CLI
//!
//! Inspect templates and configuration without running anything.
//!
//! ## Usage
//!
//! ```bash
//! # Render a template and report missing parameters and safety
//! querygate render --template query.sql --schema params.json --params '{"userid": "22"}'
//!
//! # Fingerprint a query for a data source
//! querygate fingerprint --data-source 1 --query "SELECT 1"
//!
//! # Print the effective configuration
//! querygate check-config --config querygate.toml
//! ```
//!
//! Set `QG_TRACE=1` to write traces to `QG_TRACE_FILE` (default
//! `qg_trace.log`).

use std::env;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use querygate::config::LoggingConfig;
use querygate::execution::{normalize_query, Fingerprint};
use querygate::{Config, ParamValues, ParameterSchema, ParameterizedQuery};

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "querygate")]
#[command(about = "Parameterized query safety and execution coordination")]
struct Args {
    /// Configuration file (defaults to querygate.toml + querygate.local.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a template with parameter values
    Render {
        /// Template file, or `-` for stdin
        #[arg(long)]
        template: PathBuf,

        /// JSON array of parameter definitions
        #[arg(long)]
        schema: Option<PathBuf>,

        /// JSON object of parameter values
        #[arg(long)]
        params: Option<String>,
    },

    /// Print the fingerprint of a query
    Fingerprint {
        #[arg(long = "data-source")]
        data_source: u64,

        #[arg(long)]
        query: String,
    },

    /// Load and print the effective configuration
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    init_tracing(&config.logging);

    match args.command {
        Command::Render {
            template,
            schema,
            params,
        } => render(&template, schema.as_deref(), params.as_deref()),
        Command::Fingerprint { data_source, query } => {
            let fingerprint = Fingerprint::new(data_source, &query);
            println!("normalized:  {}", normalize_query(&query));
            println!("fingerprint: {fingerprint}");
            Ok(())
        }
        Command::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to serialize configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(&path.to_string_lossy())
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Config::load().context("Failed to load configuration"),
    }
}

fn render(template: &Path, schema: Option<&Path>, params: Option<&str>) -> Result<()> {
    let template = if template == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read template from stdin")?;
        buf
    } else {
        std::fs::read_to_string(template)
            .with_context(|| format!("Failed to read template {}", template.display()))?
    };

    let schema = match schema {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read schema {}", path.display()))?;
            let schema: ParameterSchema =
                serde_json::from_str(&raw).context("Invalid parameter schema")?;
            Some(schema)
        }
        None => None,
    };

    let values: ParamValues = match params {
        Some(raw) => serde_json::from_str(raw).context("Parameters must be a JSON object")?,
        None => ParamValues::new(),
    };

    let mut query = ParameterizedQuery::new(template, schema);
    query.apply(values)?;

    let missing: Vec<String> = query.missing_params().into_iter().collect();
    println!("{}", query.text());
    println!();
    println!(
        "missing: {}",
        if missing.is_empty() {
            "-".to_string()
        } else {
            missing.join(", ")
        }
    );
    println!("safe:    {}", query.is_safe());
    Ok(())
}

fn init_tracing(logging_config: &LoggingConfig) {
    // Environment variables take precedence over config file values
    let enabled = env::var("QG_TRACE").ok().is_some_and(|v| v != "0");
    if !enabled {
        return;
    }

    let log_path = env::var("QG_TRACE_FILE").unwrap_or_else(|_| "qg_trace.log".to_string());

    let json = env::var("QG_TRACE_JSON")
        .ok()
        .map_or_else(|| logging_config.format == "json", |v| v != "0");

    let level = env::var("QG_TRACE_LEVEL")
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("ERROR: Unable to open QG_TRACE_FILE '{log_path}': {e}");
            return;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    let _ = TRACE_GUARD.set(guard);

    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(non_blocking);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.compact().finish())
    };
    if let Err(e) = result {
        eprintln!("ERROR: Unable to install tracing subscriber: {e}");
    }
}
