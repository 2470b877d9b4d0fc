use clap::{Parser, Subcommand};
use mq_relay::{
    config::Config,
    delay::{DelayStore, Delayer, RedisDelayStore},
    messaging::{KafkaSink, Producer, WriterConfig},
    relay::Relay,
    telemetry,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mq-relay")]
#[command(version, about = "Redis delay queue and Kafka relay", long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the delay scheduler and forward due items to Kafka
    Relay {
        /// Print Prometheus metrics every N seconds
        #[arg(long)]
        metrics_every: Option<u64>,
    },

    /// Schedule a JSON payload for delayed delivery
    PushDelay {
        #[arg(short, long)]
        topic: String,

        #[arg(short = 'd', long)]
        delay_secs: u64,

        /// JSON payload
        #[arg(short = 'D', long)]
        data: String,
    },

    /// Publish a JSON payload now
    Produce {
        #[arg(short, long)]
        topic: String,

        /// JSON payload
        #[arg(short = 'D', long)]
        data: String,
    },

    /// Show pending and claimed counts per bucket
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        std::env::set_var("CONFIG_PATH", path);
    }

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Using default configuration");
        Config::default()
    });

    telemetry::init_tracing(&config.observability)?;

    if config.observability.prometheus_enabled {
        if let Err(e) = mq_relay::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        }
    }

    match cli.command {
        Commands::Relay { metrics_every } => run_relay(&config, metrics_every).await?,

        Commands::PushDelay {
            topic,
            delay_secs,
            data,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&data)?;
            let delayer = delayer(&config).await?;
            let fire_at = delayer
                .push(&topic, &payload, Duration::from_secs(delay_secs))
                .await?;
            println!("{}", serde_json::json!({ "topic": topic, "fireAt": fire_at }));
        }

        Commands::Produce { topic, data } => {
            let payload: serde_json::Value = serde_json::from_str(&data)?;
            let writer_config = WriterConfig {
                async_mode: false,
                ..WriterConfig::from(&config.writer)
            };
            let sink = Arc::new(KafkaSink::new(&config.kafka_connection()?, &writer_config)?);
            let producer = Producer::new(sink, writer_config)?;
            producer.push(&topic, &payload).await?;
            producer.close().await?;
            println!("{}", serde_json::json!({ "topic": topic, "status": "sent" }));
        }

        Commands::Stats => {
            let stats = delayer(&config).await?.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn delayer(config: &Config) -> mq_relay::Result<Delayer> {
    let store: Arc<dyn DelayStore> = Arc::new(RedisDelayStore::new(&config.redis.url).await?);
    Delayer::new(store, (&config.delay).into())
}

async fn run_relay(config: &Config, metrics_every: Option<u64>) -> mq_relay::Result<()> {
    tracing::info!(
        "Starting {} v{}",
        config.observability.service_name,
        env!("CARGO_PKG_VERSION")
    );

    let mut relay = Relay::connect(config).await?;
    relay.start();

    match metrics_every.filter(|secs| *secs > 0) {
        Some(secs) => {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => print!("{}", mq_relay::metrics::gather_text()),
                    signal = tokio::signal::ctrl_c() => {
                        signal?;
                        break;
                    }
                }
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    tracing::info!("Shutdown signal received");
    relay.shutdown().await
}
