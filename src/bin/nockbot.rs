use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nockbot::{
    RecipientId,
    actors::{
        scheduler::{SchedulerHandle, SchedulerSettings},
        updates::ListenerHandle,
    },
    alerts::AlertManager,
    commands::CommandHandler,
    config::Config,
    notifier::Notifier,
    provider::{MetricSource, NockBlocksClient},
    storage::open_backend,
    subscribers::SubscriberStore,
    telegram::TelegramClient,
};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Optional JSON config file; environment variables override its values
    #[arg(short)]
    file: Option<String>,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![("nockbot", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.file.as_deref())?;

    let level = config
        .log_level
        .parse::<LevelFilter>()
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    init(level);
    trace!("started with args: {args:?}");

    let backend = open_backend(&config.storage)
        .await
        .context("failed to open subscriber storage")?;
    let store = Arc::new(
        SubscriberStore::open(backend)
            .await
            .context("failed to load subscribers")?,
    );

    for chat_id in &config.alert_chat_ids {
        if let Err(e) = store.add(RecipientId::new(chat_id.as_str())).await {
            warn!("could not register static alert chat {chat_id}: {e}");
        }
    }

    let source: Arc<dyn MetricSource> = Arc::new(NockBlocksClient::new(&config.provider)?);
    let telegram = TelegramClient::new(&config.telegram)?;

    let settings = SchedulerSettings::from_config(&config);
    let alerts = AlertManager::new(Notifier::new(store.clone(), Arc::new(telegram.clone())));
    let scheduler = SchedulerHandle::spawn(settings.clone(), source.clone(), alerts);

    let handler = CommandHandler::new(store.clone(), scheduler.clone(), source, &settings);
    let listener = ListenerHandle::spawn(telegram, handler);

    info!(
        "nockbot running: polling every {:?}, alerting below {} MP/s, {} subscribers",
        settings.interval,
        settings.threshold,
        store.len().await
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    listener.shutdown().await?;
    scheduler.shutdown().await?;

    Ok(())
}
