use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{check_status, http_client, Collector};
use crate::error::PipelineError;
use crate::types::{Asset, Observation, ObservationData, Sentiment};

const CRYPTOPANIC_API_URL: &str = "https://cryptopanic.com/api/v1";

#[derive(Debug, Deserialize)]
struct PostsResponse {
    #[serde(default)]
    results: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    published_at: DateTime<Utc>,
    #[serde(default)]
    source: Option<PostSource>,
    #[serde(default)]
    votes: Votes,
}

#[derive(Debug, Deserialize)]
struct PostSource {
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct Votes {
    #[serde(default)]
    positive: u32,
    #[serde(default)]
    negative: u32,
    #[serde(default)]
    important: u32,
}

impl Votes {
    fn sentiment(&self) -> Sentiment {
        if self.positive > self.negative {
            Sentiment::Bullish
        } else if self.negative > self.positive {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        }
    }

    /// 0.3 baseline, +0.1 per "important" vote, +0.02 per sentiment vote.
    fn importance(&self) -> f64 {
        let votes = (self.positive + self.negative) as f64;
        (0.3 + 0.1 * self.important as f64 + 0.02 * votes).min(1.0)
    }
}

fn to_observation(asset_id: &str, post: Post) -> Observation {
    Observation::new(
        asset_id,
        post.published_at,
        ObservationData::Narrative {
            importance: post.votes.importance(),
            sentiment: post.votes.sentiment(),
            title: post.title,
            source: post.source.map(|s| s.title),
        },
    )
}

/// CryptoPanic posts collector.
pub struct CryptoPanicClient {
    client: Client,
    api_key: String,
    base_url: String,
    /// Per-asset publish time of the newest post seen.
    watermarks: DashMap<String, DateTime<Utc>>,
}

impl CryptoPanicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url: CRYPTOPANIC_API_URL.to_string(),
            watermarks: DashMap::new(),
        }
    }
}

#[async_trait]
impl Collector for CryptoPanicClient {
    fn name(&self) -> &'static str {
        "cryptopanic"
    }

    async fn fetch(&self, asset: &Asset) -> Result<Vec<Observation>, PipelineError> {
        let response = self
            .client
            .get(format!("{}/posts/", self.base_url))
            .query(&[
                ("auth_token", self.api_key.as_str()),
                ("currencies", asset.id.as_str()),
                ("filter", "hot"),
                ("public", "true"),
            ])
            .send()
            .await?;
        let body: PostsResponse = check_status("cryptopanic", response).await?.json().await?;

        let since = self.watermarks.get(&asset.id).map(|w| *w);
        let fresh: Vec<Post> = body
            .results
            .into_iter()
            .filter(|p| since.map_or(true, |s| p.published_at > s))
            .collect();
        if let Some(newest) = fresh.iter().map(|p| p.published_at).max() {
            self.watermarks.insert(asset.id.clone(), newest);
        }

        debug!("CryptoPanic: {} new posts for {}", fresh.len(), asset.id);
        Ok(fresh
            .into_iter()
            .map(|post| to_observation(&asset.id, post))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_parsing() {
        let json = r#"{
            "count": 1,
            "results": [{
                "kind": "news",
                "title": "ETF approved",
                "published_at": "2024-01-10T21:00:00Z",
                "source": {"title": "CoinDesk", "domain": "coindesk.com"},
                "votes": {"positive": 12, "negative": 2, "important": 4, "liked": 3}
            }]
        }"#;
        let body: PostsResponse = serde_json::from_str(json).unwrap();
        let obs = to_observation("btc", body.results.into_iter().next().unwrap());
        assert_eq!(obs.asset_id, "BTC");
        match obs.data {
            ObservationData::Narrative {
                importance,
                sentiment,
                source,
                ..
            } => {
                assert_eq!(sentiment, Sentiment::Bullish);
                assert!((importance - 0.98).abs() < 1e-9);
                assert_eq!(source.as_deref(), Some("CoinDesk"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_votes_default_to_neutral() {
        let votes = Votes::default();
        assert_eq!(votes.sentiment(), Sentiment::Neutral);
        assert_eq!(votes.importance(), 0.3);
        let heavy = Votes {
            positive: 0,
            negative: 1,
            important: 20,
        };
        assert_eq!(heavy.sentiment(), Sentiment::Bearish);
        assert_eq!(heavy.importance(), 1.0);
    }
}
