//! Telegram Bot API adapters.

pub mod bot;
pub mod client;
pub mod error;
pub mod types;

pub use bot::{Bot, BotConfig, Command};
pub use client::TelegramClient;
pub use error::TelegramError;
