//! labelrun CLI - Resumable LLM text classification.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labelrun::client::HealthStatus;
use labelrun::{
    AccuracyReport, AttemptLedger, BatchRunner, CategorySet, CheckpointStore,
    ClassificationService, Config, Dataset, LlmClassifier, LlmClient, RateLimiter, RunnerSettings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "labelrun")]
#[command(version)]
#[command(about = "Resumable, checkpointed text classification via an LLM endpoint")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the dataset, resuming from the checkpoint
    Run {
        /// Override the input dataset path
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Override the checkpoint CSV path
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Override the number of records to classify
        #[arg(short, long)]
        target: Option<u64>,

        /// Override the number of records per persisted batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Offer dead-lettered records again
        #[arg(long)]
        retry_dead_letters: bool,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Report accuracy of an existing checkpoint
    Accuracy {
        /// Override the checkpoint CSV path
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate {
        /// Also check that the endpoint is reachable
        #[arg(long)]
        ping: bool,
    },

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn print_example_config() {
    let example = r#"# labelrun configuration file

[service]
# API key (can also use the env var named by api_key_env)
# api_key = "${MY_KEY}"
api_key_env = "OPENROUTER_API_KEY"
base_url = "https://openrouter.ai/api/v1"
model = "openai/gpt-4o-mini"
max_tokens = 256
temperature = 0.0
timeout_secs = 180
max_retries = 1   # transport attempts per record call

# [service.headers]
# "HTTP-Referer" = "https://example.org"

[classification]
system_prompt = "prompts/classify.md"
categories = ["Anxiety", "Bipolar", "Depression", "Normal"]
parse_failure = "sentinel"   # or "retry"

[dataset]
path = "data/statements.csv"
text_column = "statement"
label_column = "status"
# index_column = "id"

[checkpoint]
path = "output/results.csv"

[runner]
target_count = 10000
batch_size = 100
max_attempts = 3   # 0 = retry failed records forever
record_timeout_secs = 300
# max_cycles = 50
"#;
    println!("{example}");
}

fn print_accuracy(report: &AccuracyReport) {
    match report.proportion() {
        Some(p) => println!("Accuracy:    {:.2}%", p * 100.0),
        None => println!("Accuracy:    n/a"),
    }
    println!("Compared:    {}/{}", report.matched, report.compared);
    println!("Unlabeled:   {}", report.unlabeled);
    println!("Unclassified: {}", report.unclassified);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate { ping } => {
            let config = load_config(&cli.config)?;

            let service = config
                .resolve_service(true)
                .context("Failed to resolve API key")?;
            let prompt = &config.classification.system_prompt;
            if !prompt.exists() {
                warn!("System prompt file not found: {}", prompt.display());
            }

            info!("Configuration is valid");
            info!("  Model: {} at {}", service.model, service.base_url);
            let categories = CategorySet::new(config.classification.categories.iter().cloned());
            if categories.is_open() {
                info!("  Categories: open (any label accepted)");
            } else {
                info!("  Categories: {}", categories.labels().join(", "));
            }
            info!(
                "  Target: {} records in batches of {}",
                config.runner.target_count, config.runner.batch_size
            );
            info!("  Checkpoint: {}", config.checkpoint.path.display());

            if ping {
                let client = LlmClient::new(&service, None)?;
                let health = client.health_check().await;
                match health.status {
                    HealthStatus::Healthy => info!(
                        "  Endpoint: {} ({}ms)",
                        health.status,
                        health.latency_ms.unwrap_or(0)
                    ),
                    _ => warn!(
                        "  Endpoint: {} ({})",
                        health.status,
                        health.error.unwrap_or_default()
                    ),
                }
            }
            return Ok(());
        }

        Commands::Accuracy { checkpoint } => {
            let config = load_config(&cli.config)?;
            let path = checkpoint.unwrap_or(config.checkpoint.path);

            let store = CheckpointStore::new(&path);
            if !store.exists() {
                anyhow::bail!("Checkpoint not found: {}", path.display());
            }
            let state = store.load().context("Failed to load checkpoint")?;
            let ledger = AttemptLedger::load(&AttemptLedger::path_for(&path))
                .context("Failed to load attempt ledger")?;

            println!("\n=== Checkpoint {} ===", path.display());
            println!("Rows:        {}", state.size());
            print_accuracy(&AccuracyReport::from_state(&state));
            println!("Dead letters: {}", ledger.dead_letter_count());
            for (index, record) in ledger.dead_letters() {
                println!(
                    "  #{index}: {} attempts, last error: {}",
                    record.attempts, record.last_error
                );
            }
        }

        Commands::Run {
            dataset,
            checkpoint,
            target,
            batch_size,
            retry_dead_letters,
            no_progress,
        } => {
            let mut config = load_config(&cli.config)?;

            // Apply CLI overrides
            if let Some(path) = dataset {
                config.dataset.path = path;
            }
            if let Some(path) = checkpoint {
                config.checkpoint.path = path;
            }
            if let Some(target) = target {
                config.runner.target_count = target;
            }
            if let Some(batch_size) = batch_size {
                config.runner.batch_size = batch_size;
            }
            config.validate().context("Invalid configuration")?;

            let system_prompt = std::fs::read_to_string(&config.classification.system_prompt)
                .with_context(|| {
                    format!(
                        "Failed to read system prompt {:?}",
                        config.classification.system_prompt
                    )
                })?;

            let resolved = config.resolve_service(false)?;
            if resolved.api_key.is_none() {
                warn!(
                    "No API key in config or ${}, sending unauthenticated requests",
                    config.service.api_key_env
                );
            }

            let rate_limiter = Arc::new(RateLimiter::new());
            let client = Arc::new(LlmClient::new(&resolved, Some(rate_limiter.clone()))?);
            info!("Classifying with {} at {}", client.model(), client.base_url());
            let service: Arc<dyn ClassificationService> =
                Arc::new(LlmClassifier::new(client.clone(), system_prompt));

            let dataset = Dataset::load(&config.dataset)?;
            let categories = CategorySet::new(config.classification.categories.iter().cloned());

            if retry_dead_letters {
                let mut ledger =
                    AttemptLedger::load(&AttemptLedger::path_for(&config.checkpoint.path))?;
                let released = ledger.release_dead_letters();
                ledger.save()?;
                info!("Released {released} dead-lettered records");
            }

            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing current record");
                    ctrl_c.cancel();
                }
            });

            let runner = BatchRunner::new(
                service,
                CheckpointStore::new(&config.checkpoint.path),
                dataset,
                categories,
                RunnerSettings::from_config(&config),
            )
            .with_cancellation(cancel)
            .with_progress(!no_progress);

            let summary = runner.run().await?;
            let (tokens_in, tokens_out) = client.total_tokens();

            println!("\n=== Classification Complete ===");
            println!(
                "Stopped:     {}",
                summary
                    .stop_reason
                    .map(|r| r.to_string())
                    .unwrap_or_default()
            );
            println!("Target:      {}", summary.target);
            println!("Resumed at:  {}", summary.resumed_from);
            println!("Cycles:      {}", summary.cycles);
            println!("Classified:  {}", summary.classified);
            println!("Unparsable:  {}", summary.unparsable);
            println!("Failures:    {}", summary.failures);
            println!("Dead letters: {}", summary.dead_lettered);
            println!("Checkpoint:  {} rows", summary.final_size);
            print_accuracy(&summary.accuracy);
            println!("Requests:    {}", client.total_requests());
            println!("Tokens:      {tokens_in} in / {tokens_out} out");
            println!(
                "Rate limits: {} x 429, {:.1}s waited",
                rate_limiter.total_429s(),
                rate_limiter.total_wait_secs()
            );
            println!("Throughput:  {:.0}/hr", summary.throughput_per_hour);
            println!("Runtime:     {:.1}s", summary.runtime_secs);
            println!("Output:      {:?}", config.checkpoint.path);
        }
    }

    Ok(())
}
