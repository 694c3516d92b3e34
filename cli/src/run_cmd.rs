use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use checkgate_core::Conversation;
use checkgate_core::ReceiptIntake;
use checkgate_core::SharedStores;
use checkgate_core::config::Config;
use checkgate_core::config::TOKEN_ENV;
use checkgate_core::gate::AdminElevationGate;

use crate::poller;
use crate::poller::PollSettings;
use crate::telegram::TelegramClient;

/// Start the bot and poll until interrupted.
pub async fn run(config: Config) -> Result<()> {
    let token = config
        .bot_token
        .as_ref()
        .ok_or_else(|| anyhow!("{TOKEN_ENV} is not set"))?;

    let stores = SharedStores::open(&config.data_dir)
        .with_context(|| format!("failed to open stores in {}", config.data_dir.display()))?;
    let extractors = config
        .extractor_set()
        .context("failed to build receipt extractors")?;
    tracing::info!(
        document = %extractors.document_kind(),
        data_dir = %config.data_dir.display(),
        "starting checkgate"
    );

    let client = TelegramClient::new(
        config.telegram.api_base.clone(),
        token.expose(),
        config.poll_timeout(),
    )
    .context("failed to build Telegram client")?;
    let intake = ReceiptIntake::new(extractors, stores.clone(), config.scratch_dir.clone());
    let gate = AdminElevationGate::new(config.admin_password.clone(), stores);
    let conversation = Conversation::new(
        intake,
        gate,
        Arc::new(client.clone()),
        config.replies.clone(),
    );

    let settings = PollSettings {
        timeout: config.poll_timeout(),
        retry_delay: config.retry_delay(),
    };
    poller::run(client, conversation, settings, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await;
    Ok(())
}
