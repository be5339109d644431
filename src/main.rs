use buddybot::api::{self, ApiState};
use buddybot::auth::SessionStore;
use buddybot::config::Config;
use buddybot::context::ContextAssembler;
use buddybot::conversation::ConversationStore;
use buddybot::db::Db;
use buddybot::escalation::{EscalationReporter, LogNotifier};
use buddybot::generator::HttpGenerator;
use buddybot::guardrails::GuardrailStore;
use buddybot::memory::MemoryStore;
use buddybot::pipeline::ChatPipeline;
use buddybot::profile::ProfileResolver;
use buddybot::safety::RuleClassifier;

use anyhow::Context as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buddybot=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let db = Db::connect(&config.data_dir).await.map_err(|e| anyhow::anyhow!(e))?;
    let pool = db.pool.clone();

    let resolver = ProfileResolver::new(pool.clone());
    let assembler = ContextAssembler::new(
        GuardrailStore::new(pool.clone()),
        MemoryStore::new(pool.clone()),
    );
    let generator =
        HttpGenerator::new(&config.generator).map_err(|e| anyhow::anyhow!(e))?;
    let store = ConversationStore::new(pool.clone());
    let reporter = EscalationReporter::new(pool.clone(), Arc::new(LogNotifier));

    let pipeline = ChatPipeline::new(
        resolver.clone(),
        assembler,
        Arc::new(RuleClassifier),
        Arc::new(generator),
        store.clone(),
        reporter.clone(),
    );

    let state = Arc::new(ApiState {
        sessions: SessionStore::new(pool.clone()),
        pipeline,
        resolver,
        conversations: store,
        reporter,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "buddybot listening");

    axum::serve(listener, api::router(state)).await?;
    Ok(())
}
