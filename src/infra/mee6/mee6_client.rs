use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};

use crate::core::leveling::{ImportError, Mee6Page, Mee6Source};

/// Reads the public Mee6 leaderboard. Only guilds that made their leaderboard
/// public return data.
pub struct Mee6Client {
    client: Client,
    base_url: String,
}

impl Mee6Client {
    pub fn new() -> Result<Self, ImportError> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert(
            "User-Agent",
            HeaderValue::from_static("LevelerBot/0.3"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ImportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: "https://mee6.xyz/api/plugins/levels/leaderboard".to_string(),
        })
    }

    fn page_url(&self, guild_id: u64, page: u32) -> String {
        format!("{}/{}?page={}&limit=999", self.base_url, guild_id, page)
    }
}

#[async_trait]
impl Mee6Source for Mee6Client {
    async fn leaderboard_page(&self, guild_id: u64, page: u32) -> Result<Mee6Page, ImportError> {
        let url = self.page_url(guild_id, page);
        tracing::debug!(guild_id, page, "Fetching Mee6 leaderboard page");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ImportError::Request(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(guild_id, page, status = status.as_u16(), "Mee6 returned no data");
            return Err(ImportError::NoData {
                service: "Mee6",
                status: status.as_u16(),
            });
        }

        response
            .json::<Mee6Page>()
            .await
            .map_err(|e| ImportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_urls_request_the_largest_page() {
        let client = Mee6Client::new().unwrap();
        assert_eq!(
            client.page_url(42, 3),
            "https://mee6.xyz/api/plugins/levels/leaderboard/42?page=3&limit=999"
        );
    }
}
