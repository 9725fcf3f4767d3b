//! KDL configuration parsing for the mergeit merge bot.
//!
//! This crate handles:
//! - Parsing the bot configuration file (`mergeit.kdl`)
//! - Validating that every required field is present

pub mod bot;
pub mod check;
pub mod error;

pub use bot::{
    BotConfig, CiConfig, IssueTrackerConfig, NotifierConfig, StatusProperty, TimingConfig,
    VcsConfig, load_bot_config, parse_bot_config,
};
pub use check::validate_config;
pub use error::{ConfigError, ConfigResult};
