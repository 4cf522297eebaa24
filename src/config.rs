//! Configuration types.

use std::time::Duration;

use chrono::NaiveTime;
use secrecy::SecretString;

use crate::announce::{DEFAULT_REQUIRED, Field};
use crate::error::ConfigError;

/// Default denylist of ticket-link hosts: ephemeral social posts that may
/// vanish before the event.
pub const DEFAULT_LINK_DENYLIST: &[&str] = &[
    "instagram.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "tiktok.com",
];

/// Bot configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Extraction-service credential.
    pub openai_api_key: SecretString,
    /// Extraction model name.
    pub model: String,
    /// OpenAI-compatible endpoint base URL.
    pub llm_base_url: String,
    /// Gateway credential.
    pub discord_token: SecretString,
    /// Channel polled for inbound announcements.
    pub watch_channel: String,
    /// Channel announcements are dispatched to at fire time.
    pub announce_channel: String,
    /// Persistent-store path.
    pub db_path: String,
    /// Denylist of ticket-link domains.
    pub link_denylist: Vec<String>,
    /// Required-field set for assembly.
    pub required_fields: Vec<Field>,
    /// Fallback time-of-day for time-less dates.
    pub fallback_time: NaiveTime,
    /// Gateway poll period.
    pub poll_interval: Duration,
}

impl BotConfig {
    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let openai_api_key = required_var("OPENAI_API_KEY")?;
        let discord_token = required_var("DISCORD_BOT_TOKEN")?;
        let watch_channel = required_var("FLYER_BOT_WATCH_CHANNEL")?;

        let announce_channel = std::env::var("FLYER_BOT_ANNOUNCE_CHANNEL")
            .unwrap_or_else(|_| watch_channel.clone());

        let model =
            std::env::var("FLYER_BOT_MODEL").unwrap_or_else(|_| "gpt-4.1".to_string());
        let llm_base_url = std::env::var("FLYER_BOT_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let db_path = std::env::var("FLYER_BOT_DB_PATH")
            .unwrap_or_else(|_| "./data/flyer-bot.db".to_string());

        let link_denylist = match std::env::var("FLYER_BOT_LINK_DENYLIST") {
            Ok(list) => split_list(&list),
            Err(_) => DEFAULT_LINK_DENYLIST.iter().map(|s| s.to_string()).collect(),
        };

        let required_fields = match std::env::var("FLYER_BOT_REQUIRED_FIELDS") {
            Ok(list) => parse_required_fields(&list)?,
            Err(_) => DEFAULT_REQUIRED.to_vec(),
        };

        let fallback_time = match std::env::var("FLYER_BOT_FALLBACK_TIME") {
            Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| {
                ConfigError::InvalidValue {
                    key: "FLYER_BOT_FALLBACK_TIME".to_string(),
                    message: format!("expected HH:MM, got {raw:?}: {e}"),
                }
            })?,
            Err(_) => NaiveTime::from_hms_opt(20, 0, 0).expect("valid constant time"),
        };

        let poll_interval = match std::env::var("FLYER_BOT_POLL_INTERVAL_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: "FLYER_BOT_POLL_INTERVAL_SECS".to_string(),
                    message: format!("expected integer seconds, got {raw:?}: {e}"),
                })?;
                Duration::from_secs(secs.max(1))
            }
            Err(_) => Duration::from_secs(5),
        };

        Ok(Self {
            openai_api_key: SecretString::from(openai_api_key),
            model,
            llm_base_url,
            discord_token: SecretString::from(discord_token),
            watch_channel,
            announce_channel,
            db_path,
            link_denylist,
            required_fields,
            fallback_time,
            poll_interval,
        })
    }
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_required_fields(raw: &str) -> Result<Vec<Field>, ConfigError> {
    let mut fields = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let field = Field::from_name(name).ok_or_else(|| ConfigError::InvalidValue {
            key: "FLYER_BOT_REQUIRED_FIELDS".to_string(),
            message: format!("unknown field name: {name:?}"),
        })?;
        fields.push(field);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_trims_and_lowercases() {
        let list = split_list("Instagram.com, x.com ,,tiktok.com");
        assert_eq!(list, vec!["instagram.com", "x.com", "tiktok.com"]);
    }

    #[test]
    fn parse_required_fields_accepts_known_names() {
        let fields = parse_required_fields("event_name, venue").unwrap();
        assert_eq!(fields, vec![Field::EventName, Field::Venue]);
    }

    #[test]
    fn parse_required_fields_rejects_unknown_names() {
        assert!(parse_required_fields("event_name, bogus").is_err());
    }
}
