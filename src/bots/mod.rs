//! Platform bot workers.

pub mod discord;
pub mod telegram;

pub use discord::DiscordBot;
pub use telegram::TelegramBot;
