use std::sync::Arc;

use flyer_bot::announce::Assembler;
use flyer_bot::config::BotConfig;
use flyer_bot::extract::{Extractor, OpenAiProvider};
use flyer_bot::gateway::{DiscordGateway, Gateway};
use flyer_bot::orchestrator::{JobDispatcher, Orchestrator};
use flyer_bot::scheduler::Scheduler;
use flyer_bot::store::{Database, LibSqlBackend};
use flyer_bot::temporal::TemporalNormalizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        eprintln!("  export DISCORD_BOT_TOKEN=...");
        eprintln!("  export FLYER_BOT_WATCH_CHANNEL=<channel id>");
        std::process::exit(1);
    });

    eprintln!("📣 Flyer Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Watch channel: {}", config.watch_channel);
    eprintln!("   Announce channel: {}", config.announce_channel);
    eprintln!("   Database: {}", config.db_path);

    // ── Database ─────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path).await.unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        }),
    );

    // ── Gateway ──────────────────────────────────────────────────────
    let gateway: Arc<dyn Gateway> = Arc::new(DiscordGateway::new(
        config.discord_token.clone(),
        config.watch_channel.clone(),
        config.poll_interval,
    ));
    if let Err(e) = gateway.health_check().await {
        eprintln!("Error: Discord credentials rejected: {e}");
        std::process::exit(1);
    }

    // ── Pipeline ─────────────────────────────────────────────────────
    let provider = Arc::new(OpenAiProvider::new(
        config.openai_api_key.clone(),
        config.model.clone(),
        config.llm_base_url.clone(),
    ));
    let extractor = Extractor::new(provider);
    let assembler = Assembler::new(
        config.required_fields.clone(),
        config.link_denylist.clone(),
    );
    let normalizer = TemporalNormalizer::new(config.fallback_time);

    let dispatcher = JobDispatcher::new(Arc::clone(&gateway), Arc::clone(&store));
    let scheduler = Scheduler::new(Arc::clone(&store), dispatcher);

    // Re-arm persisted jobs before accepting new messages.
    let recovered = scheduler.recover().await?;
    if recovered > 0 {
        eprintln!("   Recovered {recovered} scheduled job(s)");
    }

    let orchestrator = Orchestrator::new(
        gateway,
        store,
        scheduler,
        extractor,
        assembler,
        normalizer,
        config.announce_channel.clone(),
    );

    orchestrator.run().await?;
    Ok(())
}
