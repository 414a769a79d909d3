use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    ApplicationId, Author, ChannelId, ChatPlatform, CommandSurface, Emoji, GuildId, InteractionId,
    Message, MessageId, PlatformError, PlatformResult, Reaction, SlashCommand, UserId,
};

#[derive(Debug, Clone)]
struct MockMessage {
    author: UserId,
    reactions: Vec<(Emoji, Vec<UserId>)>,
}

#[derive(Debug, Default)]
struct MockState {
    channels: BTreeMap<ChannelId, BTreeMap<MessageId, MockMessage>>,
    sent: Vec<(ChannelId, String)>,
    direct: Vec<(UserId, String)>,
    deleted: Vec<(ChannelId, MessageId)>,
    replies: Vec<(InteractionId, String, bool)>,
    registered: Vec<(ApplicationId, GuildId, Vec<SlashCommand>)>,
    next_id: u64,
    failing_channels: HashSet<ChannelId>,
    failing_messages: HashSet<MessageId>,
    failing_dms: HashSet<UserId>,
}

/// In-memory chat platform: channels of messages with per-emoji reactor lists.
#[derive(Debug)]
pub struct MockPlatform {
    bot: UserId,
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new(bot: UserId) -> Self {
        Self {
            bot,
            state: Mutex::new(MockState {
                next_id: 1 << 60,
                ..Default::default()
            }),
        }
    }

    pub fn post(&self, channel: ChannelId, id: MessageId, author: UserId) -> MessageId {
        let mut state = self.state.lock().unwrap();
        state.channels.entry(channel).or_default().insert(
            id,
            MockMessage {
                author,
                reactions: Vec::new(),
            },
        );
        id
    }

    pub fn react(&self, channel: ChannelId, message: MessageId, symbol: &str, user: UserId) {
        self.react_with(channel, message, Emoji::unicode(symbol), user);
    }

    pub fn react_with(&self, channel: ChannelId, message: MessageId, emoji: Emoji, user: UserId) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state
            .channels
            .get_mut(&channel)
            .and_then(|c| c.get_mut(&message))
        else {
            panic!("no message {message} in channel {channel}");
        };
        add_reactor(entry, emoji, user);
    }

    pub fn message(&self, channel: ChannelId, message: MessageId) -> Option<Message> {
        let state = self.state.lock().unwrap();
        state
            .channels
            .get(&channel)
            .and_then(|c| c.get(&message))
            .map(|m| self.render(channel, message, m))
    }

    pub fn is_marked(&self, channel: ChannelId, message: MessageId, marker: &str) -> bool {
        let state = self.state.lock().unwrap();
        state
            .channels
            .get(&channel)
            .and_then(|c| c.get(&message))
            .map(|m| {
                m.reactions
                    .iter()
                    .any(|(e, users)| e.name() == marker && users.contains(&self.bot))
            })
            .unwrap_or(false)
    }

    pub fn channel_messages(&self, channel: ChannelId) -> Vec<MessageId> {
        let state = self.state.lock().unwrap();
        state
            .channels
            .get(&channel)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn sent_to(&self, channel: ChannelId) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .sent
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn direct_to(&self, user: UserId) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .direct
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<(ChannelId, MessageId)> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn replies(&self) -> Vec<(InteractionId, String, bool)> {
        self.state.lock().unwrap().replies.clone()
    }

    pub fn registered(&self) -> Vec<(ApplicationId, GuildId, Vec<SlashCommand>)> {
        self.state.lock().unwrap().registered.clone()
    }

    pub fn fail_channel(&self, channel: ChannelId) {
        self.state.lock().unwrap().failing_channels.insert(channel);
    }

    pub fn fail_message(&self, message: MessageId) {
        self.state.lock().unwrap().failing_messages.insert(message);
    }

    pub fn fail_direct_messages_to(&self, user: UserId) {
        self.state.lock().unwrap().failing_dms.insert(user);
    }

    fn render(&self, channel: ChannelId, id: MessageId, message: &MockMessage) -> Message {
        Message {
            id,
            channel_id: channel,
            author: Author {
                id: message.author,
                username: format!("user-{}", message.author),
            },
            content: String::new(),
            reactions: message
                .reactions
                .iter()
                .map(|(emoji, users)| Reaction {
                    emoji: emoji.clone(),
                    count: users.len() as u64,
                    me: users.contains(&self.bot),
                })
                .collect(),
        }
    }
}

fn add_reactor(message: &mut MockMessage, emoji: Emoji, user: UserId) {
    match message
        .reactions
        .iter_mut()
        .find(|(e, _)| e.name() == emoji.name())
    {
        Some((_, users)) if users.contains(&user) => {}
        Some((_, users)) => users.push(user),
        None => message.reactions.push((emoji, vec![user])),
    }
}

fn unavailable(what: impl std::fmt::Display) -> PlatformError {
    PlatformError::Unavailable(format!("mock failure for {what}"))
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    async fn fetch_messages_page(
        &self,
        channel: ChannelId,
        after: Option<MessageId>,
        limit: u8,
    ) -> PlatformResult<Vec<Message>> {
        let state = self.state.lock().unwrap();
        if state.failing_channels.contains(&channel) {
            return Err(unavailable(channel));
        }

        let Some(messages) = state.channels.get(&channel) else {
            return Ok(Vec::new());
        };

        // newest first, like the real endpoint
        let mut page: Vec<Message> = messages
            .iter()
            .filter(|(id, _)| after.is_none_or(|a| **id > a))
            .take(limit as usize)
            .map(|(id, m)| self.render(channel, *id, m))
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn fetch_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> PlatformResult<Message> {
        let state = self.state.lock().unwrap();
        if state.failing_messages.contains(&message) {
            return Err(unavailable(message));
        }

        state
            .channels
            .get(&channel)
            .and_then(|c| c.get(&message))
            .map(|m| self.render(channel, message, m))
            .ok_or_else(|| unavailable(message))
    }

    async fn fetch_reactors(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> PlatformResult<Vec<UserId>> {
        let state = self.state.lock().unwrap();
        if state.failing_messages.contains(&message) {
            return Err(unavailable(message));
        }

        Ok(state
            .channels
            .get(&channel)
            .and_then(|c| c.get(&message))
            .and_then(|m| m.reactions.iter().find(|(e, _)| e.name() == emoji.name()))
            .map(|(_, users)| users.clone())
            .unwrap_or_default())
    }

    async fn add_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &Emoji,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .channels
            .get_mut(&channel)
            .and_then(|c| c.get_mut(&message))
            .ok_or_else(|| unavailable(message))?;
        add_reactor(entry, emoji.clone(), self.bot);
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        let removed = state
            .channels
            .get_mut(&channel)
            .and_then(|c| c.remove(&message));
        if removed.is_none() {
            return Err(unavailable(message));
        }
        state.deleted.push((channel, message));
        Ok(())
    }

    async fn send_message(&self, channel: ChannelId, text: &str) -> PlatformResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = MessageId(state.next_id);
        state.channels.entry(channel).or_default().insert(
            id,
            MockMessage {
                author: self.bot,
                reactions: Vec::new(),
            },
        );
        state.sent.push((channel, text.to_string()));
        Ok(id)
    }

    async fn send_direct_message(&self, user: UserId, text: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_dms.contains(&user) {
            return Err(unavailable(user));
        }
        state.direct.push((user, text.to_string()));
        Ok(())
    }
}

#[async_trait]
impl CommandSurface for MockPlatform {
    async fn register_guild_commands(
        &self,
        application: ApplicationId,
        guild: GuildId,
        commands: &[SlashCommand],
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .registered
            .push((application, guild, commands.to_vec()));
        Ok(())
    }

    async fn reply_to_interaction(
        &self,
        interaction: InteractionId,
        _token: &str,
        text: &str,
        ephemeral: bool,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .replies
            .push((interaction, text.to_string(), ephemeral));
        Ok(())
    }
}
