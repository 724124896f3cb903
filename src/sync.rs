//! Fetch-and-upsert of daily exchange rates

use crate::core::clock::Clock;
use crate::core::error::{FetchError, RateSyncError};
use crate::core::model::{AuditFields, CurrencyRate, RateSource};
use crate::core::repository::{Repositories, ensure_one};
use crate::core::store::StoreError;
use crate::providers::rate_api::{Quote, RateApiClient};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How `call_api` reacts to a failing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Log the failure and continue with the next source.
    LogOnly,
    /// Stop at the first failure and return it.
    Raise,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub updated: usize,
    /// Responses without a sell price.
    pub unchanged: usize,
    /// Inactive sources.
    pub skipped: usize,
    pub failed: usize,
}

enum SourceOutcome {
    Updated,
    Unchanged,
}

pub struct RateSync {
    repos: Arc<Repositories>,
    client: RateApiClient,
    clock: Arc<dyn Clock>,
    strict: bool,
}

impl RateSync {
    pub fn new(
        repos: Arc<Repositories>,
        client: RateApiClient,
        clock: Arc<dyn Clock>,
        strict: bool,
    ) -> Self {
        Self {
            repos,
            client,
            clock,
            strict,
        }
    }

    pub fn repos(&self) -> &Repositories {
        &self.repos
    }

    /// Fetches and stores today's rate for each active source, in order.
    pub async fn call_api(
        &self,
        sources: &[RateSource],
        mode: ErrorMode,
    ) -> Result<SyncReport, RateSyncError> {
        let mut report = SyncReport::default();

        for source in sources {
            if !source.active {
                info!("Source '{}' is inactive, skipping API call", source.name);
                report.skipped += 1;
                continue;
            }

            match self.process(source).await {
                Ok(SourceOutcome::Updated) => report.updated += 1,
                Ok(SourceOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    error!(
                        source = %source.name,
                        url = %source.base_url,
                        error = %e,
                        "Rate API call failed"
                    );
                    if mode == ErrorMode::Raise {
                        return Err(e.into());
                    }
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn process(&self, source: &RateSource) -> Result<SourceOutcome, FetchError> {
        info!("Calling rate API: {}", source.base_url);
        let response = self.client.fetch(source).await?;

        let quote = Quote::parse(&response.body)
            .map_err(|message| FetchError::unexpected(&source.name, message))?;

        let outcome = match quote.rate() {
            Some(rate) => {
                let now = self.clock.now();
                self.upsert_rate(source, rate, now.date_naive()).await?;
                self.repos
                    .sources
                    .update(source.id, |s| {
                        s.set_audit(AuditFields {
                            last_response: Some(response.body.clone()),
                            last_call: Some(now),
                        })
                    })
                    .await
                    .map_err(|e| FetchError::unexpected(&source.name, e))?;
                SourceOutcome::Updated
            }
            None if self.strict => {
                return Err(FetchError::MissingSellPrice {
                    source_name: source.name.clone(),
                });
            }
            None => {
                info!(
                    "Response for '{}' has no sell_price, nothing to update",
                    source.name
                );
                SourceOutcome::Unchanged
            }
        };

        info!(
            "Rate API call succeeded for '{}'. Status: {}",
            source.name, response.status
        );
        Ok(outcome)
    }

    /// Writes `rate` for the source's (currency, date, company), updating in place when present.
    async fn upsert_rate(
        &self,
        source: &RateSource,
        rate: f64,
        date: NaiveDate,
    ) -> Result<CurrencyRate, FetchError> {
        let unexpected = |e: StoreError| FetchError::unexpected(&source.name, e);

        let currency = self
            .repos
            .currencies
            .get(source.target_currency_id)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| {
                FetchError::unexpected(
                    &source.name,
                    format!("unknown target currency id {}", source.target_currency_id),
                )
            })?;

        if let Some(company_id) = source.company_id {
            self.repos
                .companies
                .get(company_id)
                .await
                .map_err(unexpected)?
                .ok_or_else(|| {
                    FetchError::unexpected(
                        &source.name,
                        format!("unknown company id {company_id}"),
                    )
                })?;
        }

        let currency_id = currency.id;
        let company_id = source.company_id;
        let existing = self
            .repos
            .rates
            .find_first(|r| r.matches(currency_id, date, company_id))
            .await
            .map_err(unexpected)?;

        let stored = match existing {
            Some(existing) => {
                let updated = self
                    .repos
                    .rates
                    .update(existing.id, |r| r.rate = rate)
                    .await
                    .map_err(unexpected)?;
                info!("Exchange rate updated for {}: {}", currency.code, rate);
                updated
            }
            None => {
                let created = self
                    .repos
                    .rates
                    .create(|id| CurrencyRate {
                        id,
                        currency_id,
                        date,
                        company_id,
                        rate,
                    })
                    .await
                    .map_err(unexpected)?;
                info!("New exchange rate created for {}: {}", currency.code, rate);
                created
            }
        };
        Ok(stored)
    }

    /// Manual trigger: runs one source and undoes its audit writes if the call fails.
    pub async fn test_connection(
        &self,
        selection: &[RateSource],
    ) -> Result<SyncReport, RateSyncError> {
        let selected = ensure_one(selection)?;
        if selected.base_url.trim().is_empty() {
            return Err(RateSyncError::MissingBaseUrl {
                name: selected.name.clone(),
            });
        }

        let current = self.repos.sources.browse(selected.id).await?;
        let snapshot = current.audit();

        match self
            .call_api(std::slice::from_ref(&current), ErrorMode::Raise)
            .await
        {
            Ok(report) => Ok(report),
            Err(e) => {
                self.repos
                    .sources
                    .update(current.id, |s| s.set_audit(snapshot))
                    .await?;
                Err(RateSyncError::ConnectionTest(e.to_string()))
            }
        }
    }

    pub async fn test_connection_by_name(&self, name: &str) -> Result<SyncReport, RateSyncError> {
        let matches = self.repos.sources.search(|s| s.name == name).await?;
        self.test_connection(&matches).await
    }

    /// Entry point for the daily job. Per-source failures are logged, never returned.
    pub async fn run_scheduled(&self) -> Result<SyncReport, RateSyncError> {
        info!("Running scheduled exchange rate job");

        let active = self.repos.sources.search(|s| s.active).await?;
        if active.is_empty() {
            warn!("No active rate sources found");
            return Ok(SyncReport::default());
        }

        info!("Found {} active rate sources", active.len());
        let report = self.call_api(&active, ErrorMode::LogOnly).await?;
        info!(?report, "Scheduled exchange rate job completed");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::FixedClock;
    use crate::core::config::HttpConfig;
    use crate::core::model::{Company, Currency, RecordId};
    use crate::store::KeyValueStore;
    use chrono::{DateTime, TimeZone, Utc};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap()
    }

    struct Fixture {
        service: RateSync,
        currency_id: RecordId,
    }

    impl Fixture {
        async fn new(strict: bool) -> Self {
            Self::with_clock(strict, noon()).await
        }

        async fn with_clock(strict: bool, now: DateTime<Utc>) -> Self {
            let store = KeyValueStore::in_memory();
            let repos = Arc::new(Repositories::open(&store).unwrap());
            let currency = repos
                .currencies
                .create(|id| Currency {
                    id,
                    code: "USD".to_string(),
                    name: None,
                })
                .await
                .unwrap();
            let client = RateApiClient::new(&HttpConfig::default()).unwrap();
            Self {
                service: RateSync::new(repos, client, Arc::new(FixedClock(now)), strict),
                currency_id: currency.id,
            }
        }

        async fn add_source(&self, name: &str, url: String, active: bool) -> RateSource {
            self.add_scoped_source(name, url, active, None).await
        }

        async fn add_scoped_source(
            &self,
            name: &str,
            url: String,
            active: bool,
            company_id: Option<RecordId>,
        ) -> RateSource {
            let currency_id = self.currency_id;
            self.service
                .repos()
                .sources
                .create(|id| RateSource {
                    id,
                    name: name.to_string(),
                    base_url: url,
                    api_key: Some("key".to_string()),
                    target_currency_id: currency_id,
                    company_id,
                    active,
                    last_response: None,
                    last_call: None,
                })
                .await
                .unwrap()
        }

        async fn rates(&self) -> Vec<CurrencyRate> {
            self.service.repos().rates.all().await.unwrap()
        }

        async fn source(&self, id: RecordId) -> RateSource {
            self.service.repos().sources.browse(id).await.unwrap()
        }
    }

    async fn mock_api(status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rate"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn url(server: &MockServer) -> String {
        format!("{}/rate", server.uri())
    }

    #[tokio::test]
    async fn test_scheduled_run_creates_one_rate_and_audit() {
        let server = mock_api(200, r#"{"sell_price": "3.75"}"#).await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&server), true).await;

        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed, 0);

        let rates = fx.rates().await;
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].currency_id, fx.currency_id);
        assert_eq!(rates[0].date, noon().date_naive());
        assert!(rates[0].company_id.is_none());
        assert!((rates[0].rate - 1.0 / 3.75).abs() < 1e-12);

        let stored = fx.source(src.id).await;
        assert_eq!(
            stored.last_response.as_deref(),
            Some(r#"{"sell_price": "3.75"}"#)
        );
        assert_eq!(stored.last_call, Some(noon()));
    }

    #[tokio::test]
    async fn test_second_run_same_day_updates_in_place() {
        let first = mock_api(200, r#"{"sell_price": "3.75"}"#).await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&first), true).await;
        fx.service.run_scheduled().await.unwrap();

        let second = mock_api(200, r#"{"sell_price": "4.00"}"#).await;
        fx.service
            .repos()
            .sources
            .update(src.id, |s| s.base_url = url(&second))
            .await
            .unwrap();
        fx.service.run_scheduled().await.unwrap();

        let rates = fx.rates().await;
        assert_eq!(rates.len(), 1);
        assert!((rates[0].rate - 0.25).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_new_day_creates_new_rate() {
        let server = mock_api(200, r#"{"sell_price": "3.75"}"#).await;
        let fx = Fixture::new(false).await;
        fx.add_source("sunat", url(&server), true).await;
        fx.service.run_scheduled().await.unwrap();

        let tomorrow = RateSync::new(
            Arc::clone(&fx.service.repos),
            RateApiClient::new(&HttpConfig::default()).unwrap(),
            Arc::new(FixedClock(noon() + chrono::Duration::days(1))),
            false,
        );
        tomorrow.run_scheduled().await.unwrap();

        let rates = fx.rates().await;
        assert_eq!(rates.len(), 2);
        assert_ne!(rates[0].date, rates[1].date);
    }

    #[tokio::test]
    async fn test_company_scope_keeps_separate_rates() {
        let server = mock_api(200, r#"{"sell_price": "3.75"}"#).await;
        let fx = Fixture::new(false).await;
        let company = fx
            .service
            .repos()
            .companies
            .create(|id| Company {
                id,
                name: "Acme".to_string(),
            })
            .await
            .unwrap();
        fx.add_source("global", url(&server), true).await;
        fx.add_scoped_source("acme", url(&server), true, Some(company.id))
            .await;

        fx.service.run_scheduled().await.unwrap();
        fx.service.run_scheduled().await.unwrap();

        let rates = fx.rates().await;
        assert_eq!(rates.len(), 2);
        assert!(rates.iter().any(|r| r.company_id.is_none()));
        assert!(rates.iter().any(|r| r.company_id == Some(company.id)));
    }

    #[tokio::test]
    async fn test_inactive_source_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("off", url(&server), false).await;

        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report, SyncReport::default());

        let report = fx
            .service
            .call_api(std::slice::from_ref(&src), ErrorMode::Raise)
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);

        assert!(fx.rates().await.is_empty());
        assert_eq!(fx.source(src.id).await, src);
    }

    #[tokio::test]
    async fn test_http_500_leaves_everything_unchanged_when_scheduled() {
        let server = mock_api(500, "boom").await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&server), true).await;

        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(fx.rates().await.is_empty());
        assert_eq!(fx.source(src.id).await, src);
    }

    #[tokio::test]
    async fn test_failing_sibling_does_not_stop_others() {
        let bad = mock_api(500, "boom").await;
        let good = mock_api(200, r#"{"sell_price": "3.75"}"#).await;
        let fx = Fixture::new(false).await;
        fx.add_source("bad", url(&bad), true).await;
        let ok = fx.add_source("good", url(&good), true).await;

        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(fx.rates().await.len(), 1);
        assert!(fx.source(ok.id).await.last_call.is_some());
    }

    #[tokio::test]
    async fn test_missing_sell_price_changes_nothing() {
        let server = mock_api(200, r#"{"buy_price": "3.70"}"#).await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&server), true).await;

        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failed, 0);
        assert!(fx.rates().await.is_empty());
        assert_eq!(fx.source(src.id).await, src);

        // Also not an error for the manual trigger
        fx.service.test_connection(&[src]).await.unwrap();
    }

    #[tokio::test]
    async fn test_strict_mode_reports_missing_sell_price() {
        let server = mock_api(200, r#"{"buy_price": "3.70"}"#).await;
        let fx = Fixture::new(true).await;
        let src = fx.add_source("sunat", url(&server), true).await;

        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report.failed, 1);

        let err = fx.service.test_connection(&[src]).await.unwrap_err();
        assert!(err.to_string().contains("no sell_price"));
    }

    #[tokio::test]
    async fn test_invalid_price_is_unexpected_failure() {
        let server = mock_api(200, r#"{"sell_price": "0"}"#).await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&server), true).await;

        let err = fx
            .service
            .call_api(&[src], ErrorMode::Raise)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RateSyncError::Fetch(FetchError::Unexpected { .. })
        ));
        assert!(fx.rates().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_is_counted_as_failed() {
        let fx = Fixture::new(false).await;
        let src = fx.add_source("broken", "not a url".to_string(), true).await;

        let report = fx
            .service
            .call_api(std::slice::from_ref(&src), ErrorMode::LogOnly)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 0);

        let err = fx
            .service
            .call_api(&[src], ErrorMode::Raise)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RateSyncError::Fetch(FetchError::Request { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_object_body_is_treated_as_missing_sell_price() {
        let server = mock_api(200, "[1,2]").await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&server), true).await;

        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failed, 0);
        assert!(fx.rates().await.is_empty());
        assert_eq!(fx.source(src.id).await, src);

        let strict = Fixture::new(true).await;
        strict.add_source("sunat", url(&server), true).await;
        let report = strict.service.run_scheduled().await.unwrap();
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_currency_is_unexpected_failure() {
        let server = mock_api(200, r#"{"sell_price": "3.75"}"#).await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&server), true).await;
        let src = fx
            .service
            .repos()
            .sources
            .update(src.id, |s| s.target_currency_id = 99)
            .await
            .unwrap();

        let err = fx
            .service
            .call_api(&[src], ErrorMode::Raise)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown target currency id 99"));
    }

    #[tokio::test]
    async fn test_manual_trigger_restores_audit_on_failure() {
        let server = mock_api(500, "boom").await;
        let fx = Fixture::new(false).await;
        let src = fx.add_source("sunat", url(&server), true).await;
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap();
        let src = fx
            .service
            .repos()
            .sources
            .update(src.id, |s| {
                s.last_response = Some("A".to_string());
                s.last_call = Some(t0);
            })
            .await
            .unwrap();

        let err = fx
            .service
            .test_connection(&[src.clone()])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, RateSyncError::ConnectionTest(_)));
        assert!(message.contains("500"));
        assert!(message.contains("boom"));

        let stored = fx.source(src.id).await;
        assert_eq!(stored.last_response.as_deref(), Some("A"));
        assert_eq!(stored.last_call, Some(t0));
    }

    #[tokio::test]
    async fn test_manual_trigger_keeps_new_audit_on_success() {
        let server = mock_api(200, r#"{"sell_price": "3.75"}"#).await;
        let fx = Fixture::new(false).await;
        fx.add_source("sunat", url(&server), true).await;

        let report = fx.service.test_connection_by_name("sunat").await.unwrap();
        assert_eq!(report.updated, 1);

        let stored = fx.service.repos().sources.all().await.unwrap();
        assert_eq!(stored[0].last_call, Some(noon()));
        assert_eq!(fx.rates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_trigger_requires_exactly_one_record() {
        let fx = Fixture::new(false).await;
        let a = fx
            .add_source("dup", "http://localhost/a".to_string(), true)
            .await;
        let b = fx
            .add_source("dup", "http://localhost/b".to_string(), true)
            .await;

        let err = fx.service.test_connection(&[]).await.unwrap_err();
        assert!(matches!(err, RateSyncError::NotExactlyOne { count: 0, .. }));

        let err = fx.service.test_connection(&[a, b]).await.unwrap_err();
        assert!(matches!(err, RateSyncError::NotExactlyOne { count: 2, .. }));

        let err = fx.service.test_connection_by_name("dup").await.unwrap_err();
        assert!(matches!(err, RateSyncError::NotExactlyOne { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_manual_trigger_requires_base_url() {
        let fx = Fixture::new(false).await;
        let src = fx.add_source("blank", "  ".to_string(), true).await;

        let err = fx.service.test_connection(&[src]).await.unwrap_err();
        assert!(matches!(err, RateSyncError::MissingBaseUrl { .. }));
    }

    #[tokio::test]
    async fn test_no_active_sources_is_not_an_error() {
        let fx = Fixture::new(false).await;
        let report = fx.service.run_scheduled().await.unwrap();
        assert_eq!(report, SyncReport::default());
    }
}
