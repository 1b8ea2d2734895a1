use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;
use url::Url;

use crate::{
    config::SpotifyConfig,
    error::UpstreamError,
    management::TokenRefresher,
    types::{Artist, SavedTracksPage, SeveralArtistsResponse, Token, UserProfile},
};

/// Upper bound the Web API accepts for `/artists?ids=` and `/me/tracks`.
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl From<TokenResponse> for Token {
    fn from(res: TokenResponse) -> Self {
        Token {
            access_token: res.access_token,
            refresh_token: res.refresh_token.unwrap_or_default(),
            scope: res.scope.unwrap_or_default(),
            expires_in: res.expires_in,
            obtained_at: Utc::now().timestamp() as u64,
        }
    }
}

/// Thin Spotify Web API client. One instance is shared by all requests; the
/// access token is passed per call since it belongs to a session.
pub struct SpotifyClient {
    http: Client,
    config: SpotifyConfig,
}

impl SpotifyClient {
    pub fn new(config: SpotifyConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &SpotifyConfig {
        &self.config
    }

    /// Authorization URL for the PKCE flow, carrying `state` back to the callback.
    pub fn authorize_url(&self, state: &str, code_challenge: &str) -> Result<String, UpstreamError> {
        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| UpstreamError::invalid_response(format!("bad auth url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("scope", &self.config.scope)
            .append_pair("state", state);
        Ok(url.into())
    }

    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<Token, UpstreamError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let res = self.http.post(&self.config.token_url).form(&form).send().await?;
        let token: TokenResponse = parse(res).await?;
        Ok(token.into())
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Token, UpstreamError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let res = self.http.post(&self.config.token_url).form(&form).send().await?;
        let token: TokenResponse = parse(res).await?;
        debug!("access token refreshed");
        Ok(token.into())
    }

    pub async fn me(&self, access_token: &str) -> Result<UserProfile, UpstreamError> {
        self.get_json(self.api("/me"), access_token).await
    }

    pub async fn saved_tracks(
        &self,
        access_token: &str,
        offset: u64,
        limit: u64,
    ) -> Result<SavedTracksPage, UpstreamError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE as u64);
        let req = self
            .api("/me/tracks")
            .query(&[("offset", offset), ("limit", limit)]);
        self.get_json(req, access_token).await
    }

    /// Looks up at most [`MAX_PAGE_SIZE`] artists; unknown ids are skipped.
    pub async fn artists(
        &self,
        access_token: &str,
        ids: &[String],
    ) -> Result<Vec<Artist>, UpstreamError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > MAX_PAGE_SIZE {
            return Err(UpstreamError::invalid_response(format!(
                "at most {MAX_PAGE_SIZE} artist ids per request, got {}",
                ids.len()
            )));
        }

        let req = self.api("/artists").query(&[("ids", ids.join(","))]);
        let res: SeveralArtistsResponse = self.get_json(req, access_token).await?;
        Ok(res.artists.into_iter().flatten().collect())
    }

    fn api(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.config.api_url.trim_end_matches('/')))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        access_token: &str,
    ) -> Result<T, UpstreamError> {
        let res = req.bearer_auth(access_token).send().await?;
        parse(res).await
    }
}

#[async_trait]
impl TokenRefresher for SpotifyClient {
    async fn refresh(&self, refresh_token: &str) -> Result<Token, UpstreamError> {
        self.refresh_token(refresh_token).await
    }
}

async fn parse<T: DeserializeOwned>(res: Response) -> Result<T, UpstreamError> {
    Ok(res.error_for_status()?.json::<T>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SpotifyConfig {
        SpotifyConfig {
            client_id: "client".into(),
            client_secret: None,
            redirect_uri: "http://127.0.0.1:8080/auth/callback".into(),
            scope: "user-library-read".into(),
            auth_url: "https://accounts.example.com/authorize".into(),
            token_url: "https://accounts.example.com/api/token".into(),
            api_url: "https://api.example.com/v1".into(),
        }
    }

    #[test]
    fn test_authorize_url_carries_state_and_challenge() {
        let client = SpotifyClient::new(config());
        let url = Url::parse(&client.authorize_url("st&ate", "challenge").unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert!(pairs.contains(&("state".into(), "st&ate".into())));
        assert!(pairs.contains(&("code_challenge".into(), "challenge".into())));
        assert!(pairs.contains(&("code_challenge_method".into(), "S256".into())));
        assert!(pairs.contains(&(
            "redirect_uri".into(),
            "http://127.0.0.1:8080/auth/callback".into()
        )));
    }

    #[test]
    fn test_token_response_without_refresh_token() {
        let res: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":120}"#).unwrap();
        let token: Token = res.into();
        assert_eq!(token.access_token, "a");
        assert!(token.refresh_token.is_empty());
        assert_eq!(token.expires_in, 120);
    }

    #[tokio::test]
    async fn test_artists_rejects_oversized_batch() {
        let client = SpotifyClient::new(config());
        let ids: Vec<String> = (0..51).map(|i| i.to_string()).collect();
        assert!(client.artists("token", &ids).await.is_err());
        assert!(client.artists("token", &[]).await.unwrap().is_empty());
    }
}
