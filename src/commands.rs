//! Slash commands that read and change a user's settings.

use crate::settings::{DisplayMode, SettingUpdate, SettingsService, UserId};
use tracing::info;

pub const HELP_TEXT: &str = "Hello! I am Message Translate, your language learning assistant.\n\n\
Use /setlanguage [language] to set your learning language.\n\
Use /setmode [overlay|off] to set how you want to see translations.\n  \
- overlay: see translations in the chat\n  \
- off: disable translations (default)\n\n\
Use /getsettings to view your current settings.\n\n\
⚠️ Important: Make sure the bot is an ADMIN in your group and disable privacy mode with BotFather for full functionality.";

pub const SAVE_FAILED_TEXT: &str = "Sorry, I couldn't save your settings. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    SetLanguage(Option<String>),
    /// Raw first argument, validated when handled
    SetMode(Option<String>),
    GetSettings,
    Unknown(String),
}

impl Command {
    /// Parse `/name[@bot] args...`. Returns `None` for non-command text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let mut parts = rest.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let args: Vec<&str> = parts.collect();

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "setlanguage" => {
                Command::SetLanguage((!args.is_empty()).then(|| args.join(" ")))
            }
            "setmode" => Command::SetMode(args.first().map(|m| m.to_string())),
            "getsettings" => Command::GetSettings,
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}

/// Execute a command for `user_id` and return the reply text.
pub async fn handle_command(settings: &SettingsService, user_id: UserId, command: Command) -> String {
    match command {
        Command::Start | Command::Help | Command::Unknown(_) => HELP_TEXT.to_string(),

        Command::SetLanguage(None) => {
            "Please specify a language, e.g., /setlanguage Spanish".to_string()
        }
        Command::SetLanguage(Some(language)) => {
            match settings
                .set(user_id, SettingUpdate::TargetLanguage(language.clone()))
                .await
            {
                Ok(_) => {
                    info!("User {} set language to {}", user_id, language);
                    format!("Your learning language has been set to {}.", language)
                }
                Err(_) => SAVE_FAILED_TEXT.to_string(),
            }
        }

        Command::SetMode(None) => "Please specify a mode: /setmode [overlay|off]".to_string(),
        Command::SetMode(Some(raw)) => {
            let Ok(mode) = raw.parse::<DisplayMode>() else {
                return "Invalid mode. Please choose from: overlay, off".to_string();
            };
            match settings.set(user_id, SettingUpdate::DisplayMode(mode)).await {
                Ok(_) => {
                    info!("User {} set mode to {}", user_id, mode);
                    match mode {
                        DisplayMode::Overlay => "Your translation mode has been set to overlay. You will see translations in chat.",
                        DisplayMode::Off => "Your translation mode has been set to off. You will not see any translations.",
                    }
                    .to_string()
                }
                Err(_) => SAVE_FAILED_TEXT.to_string(),
            }
        }

        Command::GetSettings => {
            let current = settings.get(user_id).await;
            let language = match current.target_language.trim() {
                "" => "Not set",
                language => language,
            };
            let mode = match current.display_mode {
                DisplayMode::Overlay => "Active (overlay)",
                DisplayMode::Off => "Inactive (off)",
            };
            format!(
                "Your current settings:\nLearning language: {}\nTranslation mode: {}",
                language, mode
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ExternalStore, MemoryBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_service() -> (SettingsService, MemoryBackend) {
        let backend = MemoryBackend::new();
        let service = SettingsService::new(
            Arc::new(ExternalStore::new(backend.clone())),
            Duration::from_secs(1),
        );
        (service, backend)
    }

    async fn run(service: &SettingsService, user: i64, text: &str) -> String {
        let command = Command::parse(text).expect("command");
        handle_command(service, UserId(user), command).await
    }

    // ==================== Parsing ====================

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/HELP"), Some(Command::Help));
        assert_eq!(Command::parse("/getsettings@PhoneticBot"), Some(Command::GetSettings));
        assert_eq!(
            Command::parse("/setlanguage  Brazilian   Portuguese "),
            Some(Command::SetLanguage(Some("Brazilian Portuguese".to_string())))
        );
        assert_eq!(Command::parse("/setlanguage"), Some(Command::SetLanguage(None)));
        assert_eq!(
            Command::parse("/setmode@PhoneticBot OVERLAY extra"),
            Some(Command::SetMode(Some("OVERLAY".to_string())))
        );
        assert_eq!(
            Command::parse("/translate now"),
            Some(Command::Unknown("translate".to_string()))
        );
    }

    #[test]
    fn test_parse_non_commands() {
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("/"), None);
    }

    // ==================== Handling ====================

    #[tokio::test]
    async fn test_start_and_unknown_show_help() {
        let (service, _) = create_test_service();
        assert_eq!(run(&service, 1, "/start").await, HELP_TEXT);
        assert_eq!(run(&service, 1, "/whatever").await, HELP_TEXT);
        assert!(HELP_TEXT.contains("/setmode [overlay|off]"));
    }

    #[tokio::test]
    async fn test_set_language_and_mode_then_get() {
        let (service, _) = create_test_service();

        assert_eq!(
            run(&service, 1, "/setlanguage Spanish").await,
            "Your learning language has been set to Spanish."
        );
        assert_eq!(
            run(&service, 1, "/setmode Overlay").await,
            "Your translation mode has been set to overlay. You will see translations in chat."
        );
        assert_eq!(
            run(&service, 1, "/getsettings").await,
            "Your current settings:\nLearning language: Spanish\nTranslation mode: Active (overlay)"
        );
        assert!(service.get(UserId(1)).await.is_active());
    }

    #[tokio::test]
    async fn test_get_settings_defaults() {
        let (service, _) = create_test_service();
        assert_eq!(
            run(&service, 9, "/getsettings").await,
            "Your current settings:\nLearning language: Not set\nTranslation mode: Inactive (off)"
        );
    }

    #[tokio::test]
    async fn test_usage_hints() {
        let (service, _) = create_test_service();
        assert_eq!(
            run(&service, 1, "/setlanguage").await,
            "Please specify a language, e.g., /setlanguage Spanish"
        );
        assert_eq!(
            run(&service, 1, "/setmode").await,
            "Please specify a mode: /setmode [overlay|off]"
        );
        assert_eq!(
            run(&service, 1, "/setmode subtitles").await,
            "Invalid mode. Please choose from: overlay, off"
        );
    }

    #[tokio::test]
    async fn test_set_mode_off() {
        let (service, _) = create_test_service();
        assert_eq!(
            run(&service, 1, "/setmode off").await,
            "Your translation mode has been set to off. You will not see any translations."
        );
    }

    #[tokio::test]
    async fn test_store_failure_reported_to_user() {
        let (service, backend) = create_test_service();
        backend.set_unavailable(true);

        assert_eq!(run(&service, 1, "/setlanguage French").await, SAVE_FAILED_TEXT);
        assert_eq!(run(&service, 1, "/setmode overlay").await, SAVE_FAILED_TEXT);

        // Reads fail open instead
        assert!(run(&service, 1, "/getsettings").await.contains("Not set"));
    }
}
