//! Phonetic translation relay for Telegram groups.
//!
//! Every group message is checked against the members' stored preferences;
//! for each distinct learning language requested, the message is translated
//! once and posted back as a reply with an English-letter pronunciation.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod resolver;
pub mod retry;
pub mod security;
pub mod server;
pub mod settings;
pub mod telegram;
pub mod translator;
