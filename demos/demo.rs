use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use clap::ValueEnum;
use rt_cache::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecChoice {
    Postcard,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[clap(about, version, name = "rtcache-demo")]
struct Cli {
    /// Key of the record to read through the cache.
    #[clap(long, env = "RTCACHE_KEY", default_value = "user:42")]
    key: String,

    /// Tags to attach to the record. Repeat or separate with commas.
    #[clap(long, short, env = "RTCACHE_TAGS", value_delimiter = ',', default_value = "user,region:eu")]
    tags: Vec<String>,

    #[clap(long, env = "RTCACHE_CODEC", value_enum, default_value_t = CodecChoice::Postcard)]
    codec: CodecChoice,

    /// Maximum number of entries kept by the in-memory store.
    #[clap(long, env = "RTCACHE_MAX_CAPACITY", default_value_t = 10_000)]
    max_capacity: u64,

    /// Simulated latency of the source of truth, in milliseconds.
    #[clap(long, env = "RTCACHE_SOURCE_LATENCY", default_value_t = 200)]
    source_latency: u64,

    /// Tag or key to purge after the first two reads.
    #[clap(long, env = "RTCACHE_PURGE", default_value = "user")]
    purge: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct User {
    id:   u64,
    name: String,
}

fn setup_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rt_cache=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Tracing initialized");
    Ok(())
}

async fn run<C: Codec>(cli: &Cli) -> anyhow::Result<()> {
    let client = MemoryTaggedClient::builder().max_capacity(cli.max_capacity).build()?;
    let cache = ReadThroughCache::<MemoryTaggedClient, C>::builder()
        .client(client)
        .name("demo")
        .build()?;

    let tags = TagSet::new(cli.tags.iter().cloned());
    let latency = Duration::from_millis(cli.source_latency);

    for round in 1..=3 {
        if round == 3 {
            match cache.purge(&cli.purge).await {
                Ok(()) => info!(id = %cli.purge, "purged"),
                Err(err) if err.is_cache_miss() => info!(id = %cli.purge, "nothing to purge"),
                Err(err) => return Err(err.into()),
            }
        }

        let started = std::time::Instant::now();
        let mut user = User::default();
        let outcome = cache
            .read_through(&cli.key, &tags, &mut user, || async {
                tokio::time::sleep(latency).await;
                Ok::<_, std::io::Error>(User {
                    id:   42,
                    name: "Ada".to_string(),
                })
            })
            .await
            .with_context(|| format!("round {round}"))?;

        info!(round, ?outcome, ?user, elapsed = ?started.elapsed(), "read through");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_tracing()?;

    match cli.codec {
        CodecChoice::Postcard => run::<PostcardCodec>(&cli).await,
        CodecChoice::Json => run::<JsonCodec>(&cli).await,
    }
}
