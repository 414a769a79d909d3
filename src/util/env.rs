use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("error while fetching .env variables: {0}")]
    DotenvyError(#[from] dotenvy::Error),

    #[error("{0} is set but empty")]
    Empty(&'static str),
}

pub type EnvResult<T> = core::result::Result<T, EnvError>;

/// Loads `.env` from the working directory or its parents. A missing file is fine; the
/// variables may come from the real environment instead.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = ?e, "failed to load .env"),
    }
}

/// Secrets read from the environment.
#[derive(Clone)]
pub struct Env {
    bot_token: String,
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("bot_token", &"<redacted>")
            .finish()
    }
}

impl Env {
    pub fn init() -> EnvResult<Self> {
        Self::from_lookup(|key| dotenvy::var(key))
    }

    pub fn from_lookup<F>(lookup: F) -> EnvResult<Self>
    where
        F: Fn(&'static str) -> Result<String, dotenvy::Error>,
    {
        let bot_token = lookup("BOT_TOKEN")?;
        if bot_token.trim().is_empty() {
            return Err(EnvError::Empty("BOT_TOKEN"));
        }

        Ok(Self {
            bot_token: bot_token.trim().to_string(),
        })
    }

    pub fn bot_token(&self) -> &str {
        &self.bot_token
    }
}
