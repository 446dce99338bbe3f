use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lineage_loadgen::config::{load_config, ConfigFormat, LoadConfig, WriteErrorPolicy};
use lineage_loadgen::coordinator::Coordinator;
use lineage_loadgen::store::{connector_for, BackendKind};

#[derive(Parser, Debug)]
#[command(
    name = "loadgen",
    version,
    about = "Writes randomly shaped lineage chains into a quad-store and measures throughput"
)]
struct Args {
    /// Path to a TOML or YAML configuration file.
    #[arg(long, env = "LOADGEN_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,

    /// Worker pool size.
    #[arg(long, env = "LOADGEN_WORKERS")]
    workers: Option<usize>,

    /// Global run-time budget in milliseconds.
    #[arg(long, env = "LOADGEN_RUN_TIME_MS")]
    run_time_ms: Option<u64>,

    /// Per-worker reporting interval in milliseconds.
    #[arg(long, env = "LOADGEN_REPORT_INTERVAL_MS")]
    report_interval_ms: Option<u64>,

    /// Pending statements tolerated before a commit.
    #[arg(long, env = "LOADGEN_BATCH_THRESHOLD")]
    batch_threshold: Option<usize>,

    #[arg(long, value_enum, env = "LOADGEN_BACKEND")]
    backend: Option<BackendKind>,

    #[arg(long, env = "LOADGEN_ENDPOINT")]
    endpoint: Option<String>,

    #[arg(long, env = "LOADGEN_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "LOADGEN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, value_enum)]
    on_write_error: Option<WriteErrorPolicy>,

    /// Base RNG seed for reproducible chains.
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

impl Args {
    fn apply(self, cfg: &mut LoadConfig) {
        if let Some(v) = self.workers {
            cfg.run.workers = v;
        }
        if let Some(v) = self.run_time_ms {
            cfg.run.run_time_ms = v;
        }
        if let Some(v) = self.report_interval_ms {
            cfg.run.report_interval_ms = v;
        }
        if let Some(v) = self.batch_threshold {
            cfg.run.batch_threshold = v;
        }
        if let Some(v) = self.backend {
            cfg.store.backend = v;
        }
        if let Some(v) = self.endpoint {
            cfg.store.endpoint = v;
        }
        if self.username.is_some() {
            cfg.store.username = self.username;
        }
        if self.password.is_some() {
            cfg.store.password = self.password;
        }
        if let Some(v) = self.on_write_error {
            cfg.write.on_error = v;
        }
        if self.seed.is_some() {
            cfg.run.seed = self.seed;
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut cfg = match &args.config {
        Some(path) => load_config(path, args.config_format)?,
        None => LoadConfig::default(),
    };
    let json = args.json;
    args.apply(&mut cfg);
    cfg.validate()?;

    let connector = connector_for(&cfg.store).context("store connector")?;
    let coordinator = Coordinator::new(cfg, connector);
    let summary = coordinator
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "ctrl-c handler unavailable");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}
