use crate::core::config::HttpConfig;
use crate::core::error::FetchError;
use crate::core::model::RateSource;
use anyhow::Result;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Deserializer};
use tracing::{debug, instrument};

/// Raw `sell_price` as the API sends it, text or number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SellPrice {
    Text(String),
    Number(f64),
    Null,
}

// Keeps an explicit `null` distinct from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<SellPrice>, D::Error>
where
    D: Deserializer<'de>,
{
    SellPrice::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
struct RatePayload {
    #[serde(default, deserialize_with = "present")]
    sell_price: Option<SellPrice>,
}

/// What a response body says about the sell price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quote {
    SellPrice(f64),
    Missing,
}

impl Quote {
    /// Decodes a response body. A body that is not a JSON object, or an object
    /// without `sell_price`, is `Quote::Missing`. Any other `sell_price` that
    /// is not a positive number is an error.
    pub fn parse(body: &str) -> Result<Quote, String> {
        let value: serde_json::Value =
            serde_json::from_str(body).map_err(|e| format!("invalid JSON payload: {e}"))?;
        if !value.is_object() {
            return Ok(Quote::Missing);
        }
        let payload: RatePayload =
            serde_json::from_value(value).map_err(|e| format!("invalid JSON payload: {e}"))?;

        let price = match payload.sell_price {
            None => return Ok(Quote::Missing),
            Some(SellPrice::Null) => return Err("sell_price is null".to_string()),
            Some(SellPrice::Number(value)) => value,
            Some(SellPrice::Text(text)) => text
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid sell_price '{text}': {e}"))?,
        };

        if !price.is_finite() || price <= 0.0 {
            return Err(format!("invalid sell_price: {price}"));
        }
        Ok(Quote::SellPrice(price))
    }

    /// The stored rate, which is the reciprocal of the quoted price.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Quote::SellPrice(price) => Some(1.0 / price),
            Quote::Missing => None,
        }
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

pub struct RateApiClient {
    client: reqwest::Client,
}

impl RateApiClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client })
    }

    /// Issues a single GET against the source endpoint.
    #[instrument(name = "RateApiFetch", skip(self, source), fields(source = %source.name))]
    pub async fn fetch(&self, source: &RateSource) -> Result<ApiResponse, FetchError> {
        let url = source.base_url.as_str();
        let mut request = self
            .client
            .get(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = source.credential() {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&source.name, url, e))?;
        let status = response.status();
        debug!(%status, "Received rate API response");

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&source.name, url, e))?;

        if !status.is_success() {
            return Err(FetchError::Http {
                source_name: source.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}
