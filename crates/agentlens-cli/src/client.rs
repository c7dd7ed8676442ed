//! Thin HTTP client wrapping the AgentLens API's bearer-key auth.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Client {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.trim_end_matches('/').to_string(), api_key }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).bearer_auth(&self.api_key).send().await.with_context(|| format!("GET {path} failed"))?;
        Self::parse(response).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.http.post(self.url(path)).bearer_auth(&self.api_key).json(body).send().await.with_context(|| format!("POST {path} failed"))?;
        Self::parse(response).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.http.put(self.url(path)).bearer_auth(&self.api_key).json(body).send().await.with_context(|| format!("PUT {path} failed"))?;
        Self::parse(response).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.http.delete(self.url(path)).bearer_auth(&self.api_key).send().await.with_context(|| format!("DELETE {path} failed"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("server returned {status}: {body}");
        }
        Ok(())
    }

    /// Returns a raw streaming response for SSE consumption (`tail`).
    pub async fn stream(&self, path: &str) -> Result<reqwest::Response> {
        let response = self.http.get(self.url(path)).bearer_auth(&self.api_key).send().await.with_context(|| format!("GET {path} failed"))?;
        if !response.status().is_success() {
            let status = response.status();
            bail!("server returned {status}");
        }
        Ok(response)
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await.context("failed to read response body")?;
        if !status.is_success() {
            bail!("server returned {status}: {body}");
        }
        serde_json::from_str(&body).with_context(|| format!("failed to parse response: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_trims_trailing_slash_on_base() {
        let client = Client::new("http://localhost:8080/".to_string(), "key".to_string());
        assert_eq!(client.url("/api/events"), "http://localhost:8080/api/events");
    }
}
