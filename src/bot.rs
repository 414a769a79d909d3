use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::constants::{GET_POINTS_HISTORY_COMMAND, RESYNC_MISSED_POINTS_COMMAND};
use crate::platform::gateway::{CommandInteraction, GatewayEvent, ReactionAdd};
use crate::platform::{ApplicationId, ChatPlatform, CommandSurface, SlashCommand};
use crate::points::tasks::{TaskKind, TaskStatus, TaskTicket};
use crate::points::{Prestige, PrestigeResult};
use crate::settings::Settings;

const HISTORY_REPLY: &str = "Your points history will be DM'd to you soon.";
const RATER_ONLY_REPLY: &str = "Only the rater can trigger this command.";
const RESYNC_REPLY: &str = "Triggered missed points resync.";

#[derive(Debug, Clone, Copy, Default)]
pub struct BotOptions {
    pub deploy_slash_commands: bool,
    pub welcome_rater: bool,
}

/// Routes gateway events to the points system.
#[derive(Debug)]
pub struct Bot {
    platform: Arc<dyn ChatPlatform>,
    commands: Arc<dyn CommandSurface>,
    prestige: Arc<Prestige>,
    settings: Arc<Settings>,
    options: BotOptions,
    ready_seen: bool,
}

fn slash_commands() -> [SlashCommand; 2] {
    [
        SlashCommand::new(
            GET_POINTS_HISTORY_COMMAND,
            "You will be DM'd all yours posts and points.",
        ),
        SlashCommand::new(
            RESYNC_MISSED_POINTS_COMMAND,
            "Rater only. Triggers a resync of any missed points.",
        ),
    ]
}

fn submitted(result: PrestigeResult<TaskTicket>) -> Option<TaskTicket> {
    match result {
        Ok(ticket) => {
            tracing::debug!(task_id = %ticket.id, kind = %ticket.kind, "task queued");
            Some(ticket)
        }
        Err(e) => {
            tracing::error!(error = %e, "task dropped");
            None
        }
    }
}

async fn report_resync(ticket: TaskTicket) {
    let (id, kind) = (ticket.id, ticket.kind);
    match ticket.wait().await {
        TaskStatus::Completed => tracing::info!(task_id = %id, kind = %kind, "resync task done"),
        status => {
            tracing::warn!(task_id = %id, kind = %kind, status = ?status, "resync task did not complete")
        }
    }
}

impl Bot {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        commands: Arc<dyn CommandSurface>,
        prestige: Arc<Prestige>,
        settings: Arc<Settings>,
        options: BotOptions,
    ) -> Self {
        Self {
            platform,
            commands,
            prestige,
            settings,
            options,
            ready_seen: false,
        }
    }

    /// Consumes events until the gateway hangs up or `cancel` fires
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<GatewayEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("bot event loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(ticket) = self.handle(event).await
                            && matches!(ticket.kind, TaskKind::ResyncAll | TaskKind::ResyncMissed)
                        {
                            tokio::spawn(report_resync(ticket));
                        }
                    }
                    None => break,
                },
            }
        }

        tracing::info!("bot event loop stopped");
    }

    /// Handles one event, returning the ticket of any work it queued
    pub async fn handle(&mut self, event: GatewayEvent) -> Option<TaskTicket> {
        match event {
            GatewayEvent::Ready {
                application_id,
                user_id,
                session_id,
            } => {
                tracing::info!(user_id = %user_id, session_id = %session_id, "gateway ready");
                self.on_ready(application_id).await
            }
            GatewayEvent::ReactionAdd(reaction) => self.on_reaction(reaction),
            GatewayEvent::Command(command) => self.on_command(command).await,
        }
    }

    async fn on_ready(&mut self, application: ApplicationId) -> Option<TaskTicket> {
        if self.ready_seen {
            tracing::info!("session re-established; resyncing missed points");
            return submitted(self.prestige.resync_missed_points());
        }
        self.ready_seen = true;

        if self.options.deploy_slash_commands {
            match self
                .commands
                .register_guild_commands(application, self.settings.server_id, &slash_commands())
                .await
            {
                Ok(()) => tracing::info!("triggered slash commands deployment"),
                Err(e) => tracing::error!(error = ?e, "slash command deployment failed"),
            }
        }

        if self.options.welcome_rater {
            let welcome = format!("Hello! Welcome to the {} Bot!", self.settings.leaderboard_title);
            if let Err(e) = self
                .platform
                .send_direct_message(self.settings.rater_user_id, &welcome)
                .await
            {
                tracing::warn!(error = ?e, "failed to welcome the rater");
            }
        }

        if let Err(e) = self
            .platform
            .send_direct_message(self.settings.operator_user_id, "INIT OK")
            .await
        {
            tracing::warn!(error = ?e, "failed to report startup to the operator");
        }

        submitted(self.prestige.resync_all())
    }

    fn on_reaction(&self, reaction: ReactionAdd) -> Option<TaskTicket> {
        let symbol = reaction.emoji.name();
        if !self
            .prestige
            .is_rating_reaction(reaction.channel_id, reaction.user_id, symbol)
        {
            return None;
        }

        tracing::info!(
            channel_id = %reaction.channel_id,
            message_id = %reaction.message_id,
            symbol,
            "rating reaction"
        );
        submitted(
            self.prestige
                .add_rating(reaction.channel_id, reaction.message_id, symbol),
        )
    }

    #[instrument(skip(self, command), fields(command = %command.name, user_id = %command.user.id))]
    async fn on_command(&self, command: CommandInteraction) -> Option<TaskTicket> {
        match command.name.as_str() {
            GET_POINTS_HISTORY_COMMAND => {
                tracing::info!(username = %command.user.username, "points history requested");
                self.reply(&command, HISTORY_REPLY).await;
                submitted(self.prestige.send_points_history(command.user.id))
            }

            RESYNC_MISSED_POINTS_COMMAND => {
                if command.user.id != self.settings.rater_user_id {
                    tracing::warn!("resync refused for a non-rater");
                    self.reply(&command, RATER_ONLY_REPLY).await;
                    return None;
                }

                self.reply(&command, RESYNC_REPLY).await;
                submitted(self.prestige.resync_missed_points())
            }

            _ => {
                tracing::warn!("unknown slash command");
                None
            }
        }
    }

    async fn reply(&self, command: &CommandInteraction, text: &str) {
        if let Err(e) = self
            .commands
            .reply_to_interaction(command.id, &command.token, text, true)
            .await
        {
            tracing::warn!(error = ?e, "interaction reply failed");
        }
    }
}
