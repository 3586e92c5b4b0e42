use crate::core::leveling::{GuildSettings, SettingsStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Guild settings persisted as one pretty-printed JSON map
/// `{ guild_id: GuildSettings }`. Reads are served from the cache.
pub struct JsonSettingsStore {
    path: PathBuf,
    cache: RwLock<HashMap<u64, GuildSettings>>,
}

impl JsonSettingsStore {
    /// Load the settings file, starting empty if it does not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let cache: HashMap<u64, GuildSettings> = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            HashMap::new()
        };

        tracing::debug!(path = %path.display(), guilds = cache.len(), "Loaded guild settings");
        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let cache = self.cache.read().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&self.path)?;
        serde_json::to_writer_pretty(file, &*cache)?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn get_settings(&self, guild_id: u64) -> Result<GuildSettings, StoreError> {
        let cache = self.cache.read().await;
        Ok(cache
            .get(&guild_id)
            .cloned()
            .unwrap_or_else(|| GuildSettings::for_guild(guild_id)))
    }

    async fn save_settings(&self, settings: &GuildSettings) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        cache.insert(settings.guild_id, settings.clone());
        drop(cache); // Release lock before persisting
        self.persist().await
    }
}
