//! UpdateListener - long-polls Telegram for bot commands and answers them
//!
//! ```text
//! getUpdates → parse_command → CommandHandler → format → sendMessage
//!     └─ my_chat_member (groups) → CommandHandler::{on_subscribe, on_unsubscribe}
//! ```
//!
//! Updates are handled in order, except `/proofrate` replies: those run in their own
//! task so a slow provider cannot hold up other chats.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::RecipientId;
use crate::commands::CommandHandler;
use crate::format;
use crate::telegram::{ChatMemberUpdated, MemberStatus, TelegramClient, Update};

use super::scheduler::Backoff;

/// Seconds Telegram may hold a getUpdates request open
pub const LONG_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Help,
    Subscribe,
    Unsubscribe,
    Status,
    /// `/proofrate`, or its alias `/hashrate`
    Metrics,
    Unknown(String),
}

/// Parse the leading `/command` (optionally addressed as `/command@botname`).
///
/// Returns `None` for plain text.
pub fn parse_command(text: &str) -> Option<BotCommand> {
    let word = text.split_whitespace().next()?;
    let name = word.strip_prefix('/')?;
    let name = name.split('@').next().unwrap_or(name).to_lowercase();

    let command = match name.as_str() {
        "start" => BotCommand::Start,
        "help" => BotCommand::Help,
        "subscribe" => BotCommand::Subscribe,
        "unsubscribe" => BotCommand::Unsubscribe,
        "status" => BotCommand::Status,
        "proofrate" | "hashrate" => BotCommand::Metrics,
        _ => BotCommand::Unknown(name),
    };
    Some(command)
}

/// Produce the HTML reply for `command` sent from `chat`
pub async fn reply(handler: &CommandHandler, command: &BotCommand, chat: &RecipientId) -> String {
    match command {
        BotCommand::Start => format::welcome_message(),
        BotCommand::Help => format::help_message(handler.threshold()),
        BotCommand::Subscribe => match handler.on_subscribe(chat.clone()).await {
            Ok(added) => format::subscribe_reply(added, handler.threshold()),
            Err(e) => {
                error!("subscribe for {chat} failed: {e}");
                format::storage_failure_reply()
            }
        },
        BotCommand::Unsubscribe => match handler.on_unsubscribe(chat).await {
            Ok(removed) => format::unsubscribe_reply(removed),
            Err(e) => {
                error!("unsubscribe for {chat} failed: {e}");
                format::storage_failure_reply()
            }
        },
        BotCommand::Status => match handler.on_status_query(chat).await {
            Ok(summary) => format::status_message(&summary),
            Err(e) => {
                error!("status query failed: {e:#}");
                "⚠️ Status is unavailable right now.".to_string()
            }
        },
        BotCommand::Metrics => match handler.on_metrics_query().await {
            Ok(snapshot) => format::metrics_message(&snapshot),
            Err(e) => {
                warn!("on-demand metrics fetch failed: {e}");
                format::provider_failure_reply()
            }
        },
        BotCommand::Unknown(name) => {
            format!("🤔 Unknown command /{name}. Use /help to see what I can do.")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Joined(RecipientId),
    Left(RecipientId),
}

/// Map the bot being added to or removed from a group onto a subscription change.
///
/// Private chats and intermediate states (`restricted`) are ignored.
pub fn membership_change(update: &ChatMemberUpdated) -> Option<MembershipChange> {
    if !update.chat.is_group() {
        return None;
    }
    let chat = RecipientId::from(update.chat.id);
    match update.new_chat_member.status {
        MemberStatus::Creator | MemberStatus::Administrator | MemberStatus::Member => {
            Some(MembershipChange::Joined(chat))
        }
        MemberStatus::Left | MemberStatus::Kicked => Some(MembershipChange::Left(chat)),
        MemberStatus::Restricted | MemberStatus::Unknown => None,
    }
}

pub struct UpdateListener {
    client: TelegramClient,
    handler: CommandHandler,
    poll_timeout: u64,
    offset: Option<i64>,
    shutdown_rx: oneshot::Receiver<()>,

    /// In-flight `/proofrate` replies
    replies: JoinSet<()>,
}

impl UpdateListener {
    pub fn new(
        client: TelegramClient,
        handler: CommandHandler,
        poll_timeout: u64,
        shutdown_rx: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            client,
            handler,
            poll_timeout,
            offset: None,
            shutdown_rx,
            replies: JoinSet::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        info!("listening for bot commands");
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        loop {
            while self.replies.try_join_next().is_some() {}

            let result = tokio::select! {
                result = self.client.get_updates(self.offset, self.poll_timeout) => result,
                _ = &mut self.shutdown_rx => break,
            };

            match result {
                Ok(updates) => {
                    backoff.reset();
                    for update in updates {
                        self.offset = Some(update.update_id + 1);
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    let delay = backoff.on_failure();
                    warn!("{e:#}, retrying in {delay:?}");
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = &mut self.shutdown_rx => break,
                    }
                }
            }
        }

        while self.replies.join_next().await.is_some() {}
        info!("update listener stopped");
    }

    async fn handle_update(&mut self, update: Update) {
        if let Some(member) = update.my_chat_member {
            self.track_membership(&member).await;
            return;
        }

        let Some(message) = update.message else {
            return;
        };
        let Some(command) = message.text.as_deref().and_then(parse_command) else {
            return;
        };

        let chat = RecipientId::from(message.chat.id);
        debug!("{command:?} from {chat}");

        if command == BotCommand::Metrics {
            let client = self.client.clone();
            let handler = self.handler.clone();
            self.replies.spawn(async move {
                let text = reply(&handler, &command, &chat).await;
                let _ = client.send_message(&chat, &text).await;
            });
            return;
        }

        let text = reply(&self.handler, &command, &chat).await;
        // the client already logs failed deliveries
        let _ = self.client.send_message(&chat, &text).await;
    }

    async fn track_membership(&self, member: &ChatMemberUpdated) {
        let title = member.chat.title.as_deref().unwrap_or("untitled");
        match membership_change(member) {
            Some(MembershipChange::Joined(chat)) => {
                match self.handler.on_subscribe(chat.clone()).await {
                    Ok(true) => info!("added to group {title} ({chat}), subscribed"),
                    Ok(false) => debug!("group {title} ({chat}) already subscribed"),
                    Err(e) => error!("subscribing group {chat} failed: {e}"),
                }
            }
            Some(MembershipChange::Left(chat)) => {
                match self.handler.on_unsubscribe(&chat).await {
                    Ok(true) => info!("removed from group {title} ({chat}), unsubscribed"),
                    Ok(false) => debug!("group {title} ({chat}) was not subscribed"),
                    Err(e) => error!("unsubscribing group {chat} failed: {e}"),
                }
            }
            None => {}
        }
    }
}

pub struct ListenerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn spawn(client: TelegramClient, handler: CommandHandler) -> Self {
        Self::spawn_with_timeout(client, handler, LONG_POLL_TIMEOUT_SECS)
    }

    pub fn spawn_with_timeout(
        client: TelegramClient,
        handler: CommandHandler,
        poll_timeout: u64,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let listener = UpdateListener::new(client, handler, poll_timeout, shutdown_rx);

        Self {
            shutdown_tx,
            task: tokio::spawn(listener.run()),
        }
    }

    /// Stop listening, letting the commands being answered complete
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.task.await.context("update listener panicked")
    }
}
