use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::DISCORD_EPOCH_MS;

/// Generates a snowflake id newtype that (de)serialises as a decimal string but also
/// accepts bare integers, which hand-written settings files tend to contain.
macro_rules! snowflake_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub u64);

            impl From<u64> for $name {
                fn from(value: u64) -> Self {
                    Self(value)
                }
            }

            impl FromStr for $name {
                type Err = ParseIntError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    s.parse::<u64>().map(Self)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl Serialize for $name {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(&self.0)
                }
            }

            impl<'de> Deserialize<'de> for $name {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    deserializer.deserialize_any(SnowflakeVisitor).map(Self)
                }
            }
        )*
    };
}

snowflake_id!(
    UserId,
    ChannelId,
    MessageId,
    GuildId,
    ApplicationId,
    EmojiId,
    InteractionId
);

struct SnowflakeVisitor;

impl<'de> Visitor<'de> for SnowflakeVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a snowflake as a decimal string or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("negative snowflake {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        v.parse::<u64>()
            .map_err(|e| E::custom(format!("invalid snowflake '{v}': {e}")))
    }
}

impl UserId {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl MessageId {
    /// Creation time encoded in the id, in milliseconds since the Unix epoch
    pub fn created_at_ms(&self) -> i64 {
        ((self.0 >> 22) + DISCORD_EPOCH_MS) as i64
    }

    /// Smallest id that could have been minted at `at`
    #[cfg(test)]
    pub fn from_datetime(at: chrono::DateTime<chrono::Utc>) -> Self {
        let ms = at.timestamp_millis().max(DISCORD_EPOCH_MS as i64) as u64;
        Self((ms - DISCORD_EPOCH_MS) << 22)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emoji {
    #[serde(default)]
    pub id: Option<EmojiId>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Emoji {
    pub fn unicode(name: &str) -> Self {
        Self {
            id: None,
            name: Some(name.to_string()),
        }
    }

    #[cfg(test)]
    pub fn custom(name: &str, id: EmojiId) -> Self {
        Self {
            id: Some(id),
            name: Some(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// Form expected in reaction endpoint paths: the bare symbol, or `name:id` for custom emoji
    pub fn request_form(&self) -> String {
        match self.id {
            Some(id) => format!("{}:{}", self.name(), id),
            None => self.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: Emoji,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub me: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub channel_id: ChannelId,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

#[cfg(test)]
impl Message {
    pub fn reaction(&self, symbol: &str) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.emoji.name() == symbol)
    }
}
