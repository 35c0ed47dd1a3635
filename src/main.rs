//! Registrar - identifier assignment and reconciliation for content records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registrar::{
    api::{self, ApiState},
    auth::{self, AdminToken},
    config::{self, Config, LogLevel},
    snapshot::ExportSnapshot,
    worker, MemoryStore, RandomSource,
};

/// Identifier assignment and reconciliation for content records.
#[derive(Parser)]
#[command(name = "registrar", about = "Identifier assignment and reconciliation for content records")]
struct Cli {
    /// Data directory for the token, records and config.
    #[arg(long, env = "REGISTRAR_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to registrar.json in the data directory).
    #[arg(long, env = "REGISTRAR_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Connection options for commands that talk to a running daemon.
#[derive(Args)]
struct ClientArgs {
    /// Registrar API URL.
    #[arg(long, env = "REGISTRAR_API_URL", default_value = "http://localhost:7879")]
    api_url: String,

    /// Admin token (defaults to the token file in the data directory).
    #[arg(long, env = "REGISTRAR_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the admin token.
    Init,

    /// Start the REST API daemon.
    Daemon {
        /// Address to bind the API server.
        #[arg(long, default_value = "0.0.0.0:7879", env = "REGISTRAR_BIND")]
        bind: String,
    },

    /// Show duplicate groups per monitored field.
    Diagnose {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Show aggregate counts.
    Stats {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Show per-field issues and whether a migration is needed.
    Status {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Repair empty, invalid and duplicate values.
    ///
    /// With no category flags every category is repaired.
    Fix {
        #[command(flatten)]
        client: ClientArgs,

        /// Log changes without writing them.
        #[arg(long)]
        dry_run: bool,

        /// Fill empty values.
        #[arg(long)]
        empty: bool,

        /// Replace malformed values.
        #[arg(long)]
        invalid: bool,

        /// Reassign duplicated values.
        #[arg(long)]
        duplicates: bool,
    },

    /// Write every mapping to a file.
    Export {
        #[command(flatten)]
        client: ClientArgs,

        /// Output file.
        #[arg(long)]
        out: PathBuf,
    },

    /// Apply mappings from an export file.
    Import {
        #[command(flatten)]
        client: ClientArgs,

        /// Export file to apply.
        file: PathBuf,

        /// Log changes without writing them.
        #[arg(long)]
        dry_run: bool,

        /// Replace values that are already set.
        #[arg(long)]
        overwrite: bool,
    },
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("registrar={},tower_http=info", level.as_str()).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(config::default_data_dir);
    let config_path = cli.config.unwrap_or_else(|| config::config_path(&data_dir));

    match cli.command {
        Commands::Init => {
            init_tracing(LogLevel::default());
            init(&data_dir)?;
        }

        Commands::Daemon { bind } => {
            run_daemon(&bind, &data_dir, &config_path).await?;
        }

        Commands::Diagnose { client } => {
            init_tracing(LogLevel::Warn);
            diagnose(&Client::new(client, &data_dir)?).await?;
        }

        Commands::Stats { client } => {
            init_tracing(LogLevel::Warn);
            stats(&Client::new(client, &data_dir)?).await?;
        }

        Commands::Status { client } => {
            init_tracing(LogLevel::Warn);
            status(&Client::new(client, &data_dir)?).await?;
        }

        Commands::Fix {
            client,
            dry_run,
            empty,
            invalid,
            duplicates,
        } => {
            init_tracing(LogLevel::Warn);
            let all = !(empty || invalid || duplicates);
            let body = json!({
                "dryRun": dry_run,
                "fixEmpty": all || empty,
                "fixInvalid": all || invalid,
                "fixDuplicates": all || duplicates,
            });
            fix(&Client::new(client, &data_dir)?, &body).await?;
        }

        Commands::Export { client, out } => {
            init_tracing(LogLevel::Warn);
            export(&Client::new(client, &data_dir)?, &out).await?;
        }

        Commands::Import {
            client,
            file,
            dry_run,
            overwrite,
        } => {
            init_tracing(LogLevel::Warn);
            import(&Client::new(client, &data_dir)?, &file, dry_run, overwrite).await?;
        }
    }

    Ok(())
}

/// Create the admin token file.
fn init(data_dir: &Path) -> Result<()> {
    let path = auth::token_path(data_dir);
    AdminToken::init(&path)?;

    println!("Admin token written to {}", path.display());
    println!("Clients read it from there, or pass --token / REGISTRAR_TOKEN.");

    Ok(())
}

/// Run the API daemon.
async fn run_daemon(bind: &str, data_dir: &Path, config_path: &Path) -> Result<()> {
    let config = Config::load(config_path)?;
    init_tracing(config.log_level);

    tracing::info!(
        config = %config_path.display(),
        data_dir = %data_dir.display(),
        "Starting registrar daemon..."
    );

    let token = AdminToken::load(&auth::token_path(data_dir))?;

    std::fs::create_dir_all(data_dir)?;
    let store = Arc::new(MemoryStore::open(&config::records_path(data_dir))?);

    let auto_migrate = config.auto_migrate;
    let state = Arc::new(ApiState::new(config, store, Arc::new(RandomSource), token));

    tracing::info!(
        models = state.registry.record_types().len(),
        fields = state.registry.len(),
        "Monitored fields registered"
    );
    if state.registry.is_empty() {
        tracing::warn!("No monitored fields configured; add contentTypes to the config file");
    }

    if auto_migrate {
        let migration = worker::spawn_auto_migrate(state.reconciler.clone());
        worker::supervise("auto-migration", migration);
    }

    api::serve(state, bind).await?;

    Ok(())
}

/// Authenticated client for a running daemon.
struct Client {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl Client {
    fn new(args: ClientArgs, data_dir: &Path) -> Result<Self> {
        let token = match args.token {
            Some(token) => token,
            None => AdminToken::load(&auth::token_path(data_dir))?.as_str().to_string(),
        };

        Ok(Self {
            http: reqwest::Client::new(),
            api_url: args.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::read(path, response).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::read(path, response).await
    }

    async fn read(path: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("{} failed ({}): {}", path, status, error_text);
        }
        Ok(response.json().await?)
    }
}

fn print_errors(result: &Value) {
    let Some(errors) = result["errors"].as_array().filter(|e| !e.is_empty()) else {
        return;
    };

    println!();
    println!("Errors ({}):", errors.len());
    for e in errors {
        println!(
            "  {}.{} {}: {}",
            e["recordType"].as_str().unwrap_or("?"),
            e["field"].as_str().unwrap_or("?"),
            e["recordIdentity"].as_str().unwrap_or("-"),
            e["error"].as_str().unwrap_or("?")
        );
    }
}

async fn diagnose(client: &Client) -> Result<()> {
    let report = client.get("/diagnose").await?;

    println!("Duplicate groups: {}", report["totalDuplicateGroups"]);

    for field in report["fields"].as_array().into_iter().flatten() {
        let Some(groups) = field["duplicates"].as_array().filter(|g| !g.is_empty()) else {
            continue;
        };
        println!();
        println!(
            "{}.{}",
            field["recordType"].as_str().unwrap_or("?"),
            field["field"].as_str().unwrap_or("?")
        );
        for group in groups {
            let owners: Vec<&str> = group["recordIdentities"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .collect();
            println!("  {}  {}", group["value"].as_str().unwrap_or("?"), owners.join(", "));
        }
    }

    Ok(())
}

async fn stats(client: &Client) -> Result<()> {
    let stats = client.get("/stats").await?;

    println!("Registrar Stats");
    println!("===============");
    println!("Models:           {}", stats["models"]);
    println!("Fields:           {}", stats["fields"]);
    println!("Rows:             {}", stats["rows"]);
    println!("Empty:            {}", stats["empty"]);
    println!("Invalid:          {}", stats["invalid"]);
    println!("Duplicate groups: {}", stats["duplicateGroups"]);

    Ok(())
}

async fn status(client: &Client) -> Result<()> {
    let status = client.get("/migration/status").await?;

    println!(
        "{:<40} {:<16} {:>8} {:>8} {:>8} {:>10}",
        "TYPE", "FIELD", "ROWS", "EMPTY", "INVALID", "DUPLICATES"
    );
    println!("{}", "-".repeat(95));

    for field in status["fields"].as_array().into_iter().flatten() {
        println!(
            "{:<40} {:<16} {:>8} {:>8} {:>8} {:>10}",
            field["recordType"].as_str().unwrap_or("?"),
            field["field"].as_str().unwrap_or("?"),
            field["rows"],
            field["empty"],
            field["invalid"],
            field["duplicateGroups"]
        );
    }

    println!();
    if status["needsMigration"].as_bool().unwrap_or(false) {
        println!("Migration needed. Run `registrar fix --dry-run` to preview.");
    } else {
        println!("No issues found.");
    }

    Ok(())
}

fn print_changes(result: &Value) {
    for change in result["changes"].as_array().into_iter().flatten() {
        println!(
            "  [{}] {}.{} {}: {} -> {}",
            change["reason"].as_str().unwrap_or("?"),
            change["recordType"].as_str().unwrap_or("?"),
            change["field"].as_str().unwrap_or("?"),
            change["recordIdentity"].as_str().unwrap_or("?"),
            change["oldValue"].as_str().unwrap_or("(empty)"),
            change["newValue"].as_str().unwrap_or("?")
        );
    }
}

async fn fix(client: &Client, body: &Value) -> Result<()> {
    let result = client.post("/migration/run", body).await?;

    let mode = if result["dryRun"].as_bool().unwrap_or(true) {
        "Dry run"
    } else {
        "Applied"
    };
    println!(
        "{}: scanned {} rows, empty {}, invalid {}, duplicates {}",
        mode,
        result["scanned"],
        result["fixed"]["empty"],
        result["fixed"]["invalid"],
        result["fixed"]["duplicates"]
    );
    print_changes(&result);
    print_errors(&result);

    Ok(())
}

async fn export(client: &Client, out: &Path) -> Result<()> {
    let snapshot = client.get("/migration/export").await?;
    std::fs::write(out, serde_json::to_string_pretty(&snapshot)?)?;

    println!("Exported mappings to {}", out.display());
    Ok(())
}

async fn import(client: &Client, file: &Path, dry_run: bool, overwrite: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)?;
    let snapshot = ExportSnapshot::from_json(&text)?;
    println!(
        "Importing {} mappings exported at {}",
        snapshot.entry_count(),
        snapshot.exported_at
    );

    let body = json!({
        "mappings": snapshot.mappings,
        "dryRun": dry_run,
        "overwrite": overwrite,
    });
    let result = client.post("/migration/import", &body).await?;

    println!(
        "{}: imported {}, skipped {}",
        if dry_run { "Dry run" } else { "Applied" },
        result["imported"],
        result["skipped"]
    );
    print_changes(&result);
    print_errors(&result);

    Ok(())
}
