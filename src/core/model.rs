//! Persisted entities

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

pub type RecordId = u64;

/// A record kind stored in its own collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub id: RecordId,
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Entity for Currency {
    const KIND: &'static str = "currency";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: RecordId,
    pub name: String,
}

impl Entity for Company {
    const KIND: &'static str = "company";
}

/// Bookkeeping written after a successful API call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFields {
    pub last_response: Option<String>,
    pub last_call: Option<DateTime<Utc>>,
}

/// Settings for one external rate API.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSource {
    pub id: RecordId,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub target_currency_id: RecordId,
    /// Unset means the rate applies globally.
    #[serde(default)]
    pub company_id: Option<RecordId>,
    pub active: bool,
    #[serde(default)]
    pub last_response: Option<String>,
    #[serde(default)]
    pub last_call: Option<DateTime<Utc>>,
}

impl RateSource {
    pub const DEFAULT_NAME: &'static str = "Exchange rate API to USD";
    pub const DEFAULT_BASE_URL: &'static str = "https://api.decolecta.com/v1/tipo-cambio/sunat";

    pub fn audit(&self) -> AuditFields {
        AuditFields {
            last_response: self.last_response.clone(),
            last_call: self.last_call,
        }
    }

    pub fn set_audit(&mut self, audit: AuditFields) {
        self.last_response = audit.last_response;
        self.last_call = audit.last_call;
    }

    /// The configured key, treating an empty string as no credential.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }
}

impl fmt::Debug for RateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("target_currency_id", &self.target_currency_id)
            .field("company_id", &self.company_id)
            .field("active", &self.active)
            .field("last_response", &self.last_response)
            .field("last_call", &self.last_call)
            .finish()
    }
}

impl Entity for RateSource {
    const KIND: &'static str = "exchange_rate_source";
}

/// A dated conversion rate, unique per (currency, date, company).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub id: RecordId,
    pub currency_id: RecordId,
    pub date: NaiveDate,
    #[serde(default)]
    pub company_id: Option<RecordId>,
    pub rate: f64,
}

impl CurrencyRate {
    pub fn matches(
        &self,
        currency_id: RecordId,
        date: NaiveDate,
        company_id: Option<RecordId>,
    ) -> bool {
        self.currency_id == currency_id && self.date == date && self.company_id == company_id
    }
}

impl Entity for CurrencyRate {
    const KIND: &'static str = "currency_rate";
}
