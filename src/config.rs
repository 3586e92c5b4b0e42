// Runtime configuration, read from the environment (and `.env` via dotenv).

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

use crate::core::leveling::message_queue::{DEFAULT_DRAIN_INTERVAL, DEFAULT_QUEUE_CAPACITY};
use crate::core::leveling::LevelingOptions;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    pub discord_token: String,
    /// SQLite file (or `sqlite:` URL) for users, links, badges and credits.
    pub database_url: String,
    pub settings_path: String,
    pub batch_interval: Duration,
    pub queue_capacity: usize,
    pub command_prefixes: Vec<String>,
    /// Price of a rep cooldown reset. Zero disables resets.
    pub rep_price: u64,
    /// Enables the Tatsumaki import when set.
    pub tatsumaki_api_key: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            database_url: "data/leveling.db".to_string(),
            settings_path: "data/leveling_settings.json".to_string(),
            batch_interval: DEFAULT_DRAIN_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            command_prefixes: vec!["!".to_string()],
            rep_price: 0,
            tatsumaki_api_key: None,
        }
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any key/value source. Unset keys keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        config.discord_token = lookup("DISCORD_TOKEN").context(
            "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
        )?;

        if let Some(url) = lookup("LEVELING_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(path) = lookup("LEVELING_SETTINGS_PATH") {
            config.settings_path = path;
        }
        if let Some(secs) = lookup("LEVELING_BATCH_INTERVAL_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .context("Invalid LEVELING_BATCH_INTERVAL_SECS value")?;
            if secs == 0 {
                bail!("LEVELING_BATCH_INTERVAL_SECS must be at least 1");
            }
            config.batch_interval = Duration::from_secs(secs);
        }
        if let Some(capacity) = lookup("LEVELING_QUEUE_CAPACITY") {
            config.queue_capacity = capacity
                .trim()
                .parse()
                .context("Invalid LEVELING_QUEUE_CAPACITY value")?;
            if config.queue_capacity == 0 {
                bail!("LEVELING_QUEUE_CAPACITY must be at least 1");
            }
        }
        if let Some(prefixes) = lookup("LEVELING_COMMAND_PREFIXES") {
            config.command_prefixes = prefixes
                .split(',')
                .map(str::trim)
                .filter(|prefix| !prefix.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(price) = lookup("LEVELING_REP_PRICE") {
            config.rep_price = price
                .trim()
                .parse()
                .context("Invalid LEVELING_REP_PRICE value")?;
        }

        config.tatsumaki_api_key = lookup("TATSUMAKI_API_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(config)
    }

    pub fn leveling_options(&self) -> LevelingOptions {
        LevelingOptions {
            command_prefixes: self.command_prefixes.clone(),
            rep_price: self.rep_price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn token_is_required() {
        let err = BotConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc")])).unwrap();
        assert_eq!(config.discord_token, "abc");
        assert_eq!(config.batch_interval, Duration::from_secs(30));
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.command_prefixes, vec!["!".to_string()]);
        assert_eq!(config.rep_price, 0);
        assert_eq!(config.tatsumaki_api_key, None);
    }

    #[test]
    fn values_are_parsed() {
        let config = BotConfig::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("LEVELING_DATABASE_URL", "sqlite::memory:"),
            ("LEVELING_BATCH_INTERVAL_SECS", "5"),
            ("LEVELING_QUEUE_CAPACITY", "64"),
            ("LEVELING_COMMAND_PREFIXES", "!, ?,,[p]"),
            ("LEVELING_REP_PRICE", "250"),
            ("TATSUMAKI_API_KEY", " key123 "),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.batch_interval, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.command_prefixes, vec!["!", "?", "[p]"]);
        assert_eq!(config.leveling_options().rep_price, 250);
        assert_eq!(config.tatsumaki_api_key.as_deref(), Some("key123"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        for (key, value) in [
            ("LEVELING_BATCH_INTERVAL_SECS", "soon"),
            ("LEVELING_BATCH_INTERVAL_SECS", "0"),
            ("LEVELING_QUEUE_CAPACITY", "0"),
            ("LEVELING_REP_PRICE", "-3"),
        ] {
            let result = BotConfig::from_lookup(lookup(&[("DISCORD_TOKEN", "abc"), (key, value)]));
            assert!(result.is_err(), "{key}={value} should fail");
        }
    }
}
