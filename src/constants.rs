pub const DISCORD_API_URL: &str = "https://discord.com/api/v10";
pub const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";
pub const PERMALINK_BASE_URL: &str = "https://discord.com/channels";

/// Discord snowflakes count milliseconds from the first second of 2015
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// Reaction the bot leaves on a submission once its rating has been counted
pub const PROCESSED_MARKER: &str = "\u{2705}";

pub const MAX_MESSAGE_LENGTH: usize = 2000;
pub const MESSAGES_PER_PAGE: u8 = 100;
pub const REACTORS_PER_PAGE: u8 = 100;
pub const NO_ENTRIES: &str = "No entries";

pub const GET_POINTS_HISTORY_COMMAND: &str = "get_points_history";
pub const RESYNC_MISSED_POINTS_COMMAND: &str = "resync_missed_points";

// gateway intents: GUILDS | GUILD_MESSAGE_REACTIONS
pub const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 10);
