use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about = "Tracks rated art submissions and posts the prestige leaderboard")]
pub struct Cli {
    /// Bulk-overwrite the guild's slash commands on the first ready
    #[arg(long)]
    pub deploy_slash_commands: bool,

    /// DM a welcome message to the rater on the first ready
    #[arg(long)]
    pub welcome_rater: bool,

    /// Bot settings file
    #[arg(long, env = "SETTINGS_PATH", default_value = "settings/settings.json")]
    pub settings: PathBuf,

    /// Directory holding one reward-unlock file per contributor
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Tasks that may wait behind the running one before new ones are refused
    #[arg(long, default_value_t = 64, value_parser = clap::value_parser!(u16).range(1..))]
    pub queue_capacity: u16,

    /// Emit logs as json lines
    #[arg(long)]
    pub log_json: bool,
}

pub fn parse_cli_args() -> Cli {
    Cli::parse()
}
