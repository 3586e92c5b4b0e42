use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};

use crate::core::leveling::{ImportError, TatsuEntry, TatsuSource};

/// Reads a guild's Tatsumaki leaderboard. Needs an API key.
pub struct TatsuClient {
    client: Client,
    base_url: String,
}

impl TatsuClient {
    pub fn new(api_key: &str) -> Result<Self, ImportError> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert("User-Agent", HeaderValue::from_static("LevelerBot/0.3"));
        let mut key = HeaderValue::from_str(api_key)
            .map_err(|_| ImportError::Request("Tatsumaki API key is not a valid header".into()))?;
        key.set_sensitive(true);
        headers.insert(AUTHORIZATION, key);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ImportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: "https://api.tatsumaki.xyz/guilds".to_string(),
        })
    }

    fn leaderboard_url(&self, guild_id: u64) -> String {
        format!("{}/{}/leaderboard?limit=-1", self.base_url, guild_id)
    }
}

#[async_trait]
impl TatsuSource for TatsuClient {
    async fn leaderboard(&self, guild_id: u64) -> Result<Vec<Option<TatsuEntry>>, ImportError> {
        tracing::debug!(guild_id, "Fetching Tatsumaki leaderboard");
        let response = self
            .client
            .get(self.leaderboard_url(guild_id))
            .send()
            .await
            .map_err(|e| ImportError::Request(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(guild_id, status = status.as_u16(), "Tatsumaki returned no data");
            return Err(ImportError::NoData {
                service: "Tatsumaki",
                status: status.as_u16(),
            });
        }

        response
            .json::<Vec<Option<TatsuEntry>>>()
            .await
            .map_err(|e| ImportError::Decode(e.to_string()))
    }
}
