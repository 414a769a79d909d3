use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::bot::{Bot, BotOptions};
use crate::constants::DISCORD_GATEWAY_URL;
use crate::platform::ChatPlatform;
use crate::platform::gateway;
use crate::platform::rest::DiscordRest;
use crate::points::Prestige;
use crate::points::clock::LocalClock;
use crate::points::store::{JsonRewardStore, RewardStore};
use crate::points::tasks::TaskQueue;
use crate::settings::Settings;
use crate::util::env::{self, Env};

mod args;
mod bot;
mod constants;
mod platform;
mod points;
mod settings;
mod util;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env::load_dotenv();
    let args = args::parse_cli_args();

    util::tracing::init(args.log_json).context("failed to install the tracing subscriber")?;
    tracing::info!(args = ?args, "starting prestige bot");

    let env = Env::init().context("failed to read the bot token")?;
    let settings = Arc::new(
        Settings::load(&args.settings)
            .with_context(|| format!("failed to load settings from {}", args.settings.display()))?,
    );

    let rest = Arc::new(
        DiscordRest::new(env.bot_token()).context("failed to build the http client")?,
    );

    let store = Arc::new(JsonRewardStore::new(&args.data_dir));
    let unlocks = match store.load_all().await {
        Ok(unlocks) => unlocks,
        Err(e) => {
            tracing::error!(error = ?e, dir = %args.data_dir.display(), "reward store failed to load");
            if let Err(dm) = rest
                .send_direct_message(settings.operator_user_id, "INIT FAILED")
                .await
            {
                tracing::warn!(error = ?dm, "failed to report startup failure to the operator");
            }
            return Err(e).context("failed to load reward unlocks");
        }
    };
    tracing::info!(contributors = unlocks.len(), "reward unlocks loaded");

    let cancel = CancellationToken::new();
    let tasks = TaskQueue::new(usize::from(args.queue_capacity), cancel.child_token());

    let prestige = Arc::new(Prestige::new(
        rest.clone(),
        settings.clone(),
        Arc::new(LocalClock),
        store,
        unlocks,
        tasks,
    ));

    let bot = Bot::new(
        rest.clone(),
        rest,
        prestige.clone(),
        settings,
        BotOptions {
            deploy_slash_commands: args.deploy_slash_commands,
            welcome_rater: args.welcome_rater,
        },
    );

    let (tx_events, rx_events) = tokio::sync::mpsc::unbounded_channel();
    let mut handles = Vec::new();

    let gateway_cancel = cancel.clone();
    let token = env.bot_token().to_string();
    handles.push(tokio::spawn(async move {
        if let Err(e) = gateway::run(
            DISCORD_GATEWAY_URL.to_string(),
            token,
            tx_events,
            gateway_cancel.clone(),
        )
        .await
        {
            tracing::error!(error = %e, "gateway stopped with a fatal error");
            gateway_cancel.cancel();
        }
    }));

    handles.push(tokio::spawn(bot.run(rx_events, cancel.clone())));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received ctrl-c; shutting down"),
            Err(e) => tracing::error!(error = ?e, "failed to listen for ctrl-c; shutting down"),
        }
        signal_cancel.cancel();
    });

    for result in join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = ?e, "task join failure");
        }
    }

    prestige.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
