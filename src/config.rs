// Process configuration, loaded from the environment (and `.env`).

use crate::core::moderation::EngineSettings;
use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    /// SQLite file holding policies, warnings and vocabularies.
    pub database_path: String,
    pub engine: EngineSettings,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let discord_token = env::var("DISCORD_TOKEN").context("DISCORD_TOKEN must be set")?;
        let database_path =
            env::var("MODERATION_DB").unwrap_or_else(|_| "data/moderation.db".to_string());

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            flood_mute: secs("FLOOD_MUTE_SECS", env::var("FLOOD_MUTE_SECS").ok(), defaults.flood_mute)?,
            flood_notice_ttl: secs(
                "FLOOD_NOTICE_SECS",
                env::var("FLOOD_NOTICE_SECS").ok(),
                defaults.flood_notice_ttl,
            )?,
            warn_ban: secs("WARN_BAN_SECS", env::var("WARN_BAN_SECS").ok(), defaults.warn_ban)?,
            captcha_ban: secs(
                "CAPTCHA_BAN_SECS",
                env::var("CAPTCHA_BAN_SECS").ok(),
                defaults.captcha_ban,
            )?,
            action_timeout: secs(
                "ACTION_TIMEOUT_SECS",
                env::var("ACTION_TIMEOUT_SECS").ok(),
                defaults.action_timeout,
            )?,
            flood_includes_admins: flag(
                "FLOOD_INCLUDE_ADMINS",
                env::var("FLOOD_INCLUDE_ADMINS").ok(),
                defaults.flood_includes_admins,
            )?,
        };

        Ok(Self {
            discord_token,
            database_path,
            engine,
        })
    }
}

fn secs(name: &str, raw: Option<String>, default: Duration) -> Result<Duration> {
    match raw {
        None => Ok(default),
        Some(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of seconds, got `{}`", name, raw))?;
            if secs == 0 {
                bail!("{} must be greater than zero", name);
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

fn flag(name: &str, raw: Option<String>, default: bool) -> Result<bool> {
    match raw.as_deref().map(|s| s.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => bail!("{} must be true or false, got `{}`", name, v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_defaults_and_parses() {
        let default = Duration::from_secs(120);
        assert_eq!(secs("X", None, default).unwrap(), default);
        assert_eq!(secs("X", Some(" 30 ".into()), default).unwrap(), Duration::from_secs(30));
        assert!(secs("X", Some("0".into()), default).is_err());
        assert!(secs("X", Some("soon".into()), default).is_err());
    }

    #[test]
    fn test_flag_values() {
        assert!(!flag("X", None, false).unwrap());
        assert!(flag("X", Some("TRUE".into()), false).unwrap());
        assert!(!flag("X", Some("off".into()), true).unwrap());
        assert!(flag("X", Some("maybe".into()), false).is_err());
    }
}
