//! Market sentiment from the Fear & Greed index
//!
//! The score feeds the regime classifier's danger gate and the review
//! context sent to the external advisor. Fetches are best effort: on any
//! failure the previous snapshot stays current, and before the first
//! successful fetch the feed reports a neutral 50.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::EngineSettings;
use crate::types::SentimentSnapshot;

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct FearGreedResponse {
    data: Vec<FearGreedEntry>,
}

#[derive(Debug, Deserialize)]
struct FearGreedEntry {
    value: String,
    value_classification: String,
}

pub struct SentimentFeed {
    client: reqwest::Client,
    url: String,
    headlines_url: Option<String>,
    current: SentimentSnapshot,
}

impl SentimentFeed {
    pub fn new(settings: &EngineSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build sentiment HTTP client")?;
        Ok(Self {
            client,
            url: settings.sentiment_url.clone(),
            headlines_url: settings.headlines_url.clone(),
            current: SentimentSnapshot::default(),
        })
    }

    pub fn current(&self) -> &SentimentSnapshot {
        &self.current
    }

    /// Fetch a fresh snapshot, keeping the cached one on failure.
    pub async fn refresh(&mut self) -> Result<()> {
        let snapshot = self.fetch().await?;
        debug!(
            "Sentiment {} ({}), {} headlines",
            snapshot.score,
            snapshot.label,
            snapshot.headlines.len()
        );
        self.current = snapshot;
        Ok(())
    }

    async fn fetch(&self) -> Result<SentimentSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .context("Fear & Greed request failed")?;
        if !response.status().is_success() {
            bail!("Fear & Greed API returned {}", response.status());
        }
        let body: FearGreedResponse = response
            .json()
            .await
            .context("Invalid Fear & Greed response")?;
        let entry = body
            .data
            .first()
            .context("Fear & Greed response carried no entries")?;
        let score: f64 = entry
            .value
            .parse()
            .context("Fear & Greed value is not numeric")?;

        Ok(SentimentSnapshot {
            score,
            label: entry.value_classification.clone(),
            headlines: self.fetch_headlines().await,
            fetched_at: Utc::now(),
        })
    }

    /// Optional headline feed, a JSON array of strings. Absence or any
    /// failure yields an empty list rather than an error.
    async fn fetch_headlines(&self) -> Vec<String> {
        let Some(url) = &self.headlines_url else {
            return Vec::new();
        };
        let result = async {
            let response = self.client.get(url).send().await?;
            response.error_for_status()?.json::<Vec<String>>().await
        }
        .await;
        match result {
            Ok(headlines) => headlines,
            Err(e) => {
                warn!("Headline fetch failed: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(url: String, headlines_url: Option<String>) -> EngineSettings {
        EngineSettings {
            sentiment_url: url,
            headlines_url,
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_refresh_parses_the_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fng/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Fear and Greed Index",
                "data": [
                    {"value": "18", "value_classification": "Extreme Fear", "timestamp": "1700000000"}
                ]
            })))
            .mount(&server)
            .await;

        let mut feed = SentimentFeed::new(&settings(format!("{}/fng/", server.uri()), None)).unwrap();
        feed.refresh().await.unwrap();

        let snapshot = feed.current();
        assert!((snapshot.score - 18.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.label, "Extreme Fear");
        assert!(snapshot.headlines.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_the_cached_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fng/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut feed = SentimentFeed::new(&settings(format!("{}/fng/", server.uri()), None)).unwrap();
        assert!(feed.refresh().await.is_err());

        // still the neutral default
        let snapshot = feed.current();
        assert!((snapshot.score - 50.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.label, "Neutral");
    }

    #[tokio::test]
    async fn test_headlines_attached_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fng/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"value": "61", "value_classification": "Greed"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/news"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                "ETF inflows hit a monthly record",
                "Exchange outage triggers brief selloff"
            ])))
            .mount(&server)
            .await;

        let mut feed = SentimentFeed::new(&settings(
            format!("{}/fng/", server.uri()),
            Some(format!("{}/news", server.uri())),
        ))
        .unwrap();
        feed.refresh().await.unwrap();

        assert_eq!(feed.current().headlines.len(), 2);
        assert!((feed.current().score - 61.0).abs() < f64::EPSILON);
    }
}
