//! Game API client

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ClashApiConfig;
use crate::error::{FetchError, Result};
use crate::models::{
    CapitalRaidSeasons, ClanResponse, CurrentWar, LeagueGroup, LeagueWar, PlayerProfile, WarLog,
};

/// Read-only view of the external game API
#[async_trait::async_trait]
pub trait ClanDataSource: Send + Sync {
    async fn clan(&self, clan_tag: &str) -> Result<ClanResponse>;

    async fn player(&self, player_tag: &str) -> Result<PlayerProfile>;

    async fn current_war(&self, clan_tag: &str) -> Result<CurrentWar>;

    async fn war_log(&self, clan_tag: &str) -> Result<WarLog>;

    async fn capital_raid_seasons(&self, clan_tag: &str, limit: usize) -> Result<CapitalRaidSeasons>;

    async fn league_group(&self, clan_tag: &str) -> Result<LeagueGroup>;

    async fn league_war(&self, war_tag: &str) -> Result<LeagueWar>;
}

/// Path segment for a tag, `#` included and percent-encoded
fn encode_tag(tag: &str) -> String {
    urlencoding::encode(&format!("#{}", tag.trim_start_matches('#'))).into_owned()
}

pub struct ClashApiClient {
    client: Client,
    base_url: String,
    token: String,
}

impl ClashApiClient {
    /// Fails when the API token is not present in the environment
    pub fn new(config: &ClashApiConfig) -> Result<Self> {
        let token = config.api_token()?;
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string(), token })
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: String) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("GET {}", url);

        let response = self.client.get(&url).bearer_auth(&self.token).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { endpoint: endpoint.clone() }
            } else {
                FetchError::Http(e)
            }
        })?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::FORBIDDEN => Err(FetchError::AccessDenied { endpoint }),
            StatusCode::NOT_FOUND => Err(FetchError::NotFound { endpoint }),
            status => Err(FetchError::Status { endpoint, status: status.as_u16() }),
        }
    }
}

#[async_trait::async_trait]
impl ClanDataSource for ClashApiClient {
    async fn clan(&self, clan_tag: &str) -> Result<ClanResponse> {
        self.get(format!("/clans/{}", encode_tag(clan_tag))).await
    }

    async fn player(&self, player_tag: &str) -> Result<PlayerProfile> {
        self.get(format!("/players/{}", encode_tag(player_tag))).await
    }

    async fn current_war(&self, clan_tag: &str) -> Result<CurrentWar> {
        self.get(format!("/clans/{}/currentwar", encode_tag(clan_tag))).await
    }

    async fn war_log(&self, clan_tag: &str) -> Result<WarLog> {
        self.get(format!("/clans/{}/warlog", encode_tag(clan_tag))).await
    }

    async fn capital_raid_seasons(&self, clan_tag: &str, limit: usize) -> Result<CapitalRaidSeasons> {
        self.get(format!("/clans/{}/capitalraidseasons?limit={}", encode_tag(clan_tag), limit)).await
    }

    async fn league_group(&self, clan_tag: &str) -> Result<LeagueGroup> {
        self.get(format!("/clans/{}/currentwar/leaguegroup", encode_tag(clan_tag))).await
    }

    async fn league_war(&self, war_tag: &str) -> Result<LeagueWar> {
        self.get(format!("/clanwarleagues/wars/{}", encode_tag(war_tag))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_are_hash_prefixed_and_encoded() {
        assert_eq!(encode_tag("2PQ8RYL"), "%232PQ8RYL");
        assert_eq!(encode_tag("#8Q1"), "%238Q1");
    }

    #[test]
    fn test_client_requires_token() {
        let config = ClashApiConfig {
            token_env: "CLASH_CLIENT_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
            ..ClashApiConfig::default()
        };
        assert!(matches!(ClashApiClient::new(&config), Err(FetchError::MissingCredentials { .. })));
    }
}
