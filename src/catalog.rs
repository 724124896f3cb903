//! Keeps stored currencies, companies and rate sources in line with the config file

use crate::core::config::AppConfig;
use crate::core::model::{Company, Currency, RateSource, RecordId};
use crate::core::repository::Repositories;
use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashSet;
use tracing::{debug, info};

pub struct Catalog<'a> {
    repos: &'a Repositories,
}

impl<'a> Catalog<'a> {
    pub fn new(repos: &'a Repositories) -> Self {
        Self { repos }
    }

    /// Creates missing records and refreshes the editable fields of existing
    /// sources. Audit fields and records absent from the config are left alone.
    pub async fn apply(&self, config: &AppConfig) -> Result<()> {
        // Sources are matched by name, so each configured name must be unique
        let mut names = HashSet::new();
        for source in &config.sources {
            if !names.insert(source.name.as_str()) {
                bail!("Source name '{}' is configured more than once", source.name);
            }
        }

        for currency in &config.currencies {
            self.ensure_currency(&currency.code, currency.name.clone())
                .await?;
        }
        for company in &config.companies {
            self.ensure_company(&company.name).await?;
        }

        for source in &config.sources {
            let currency_id = self
                .currency_id(&source.target_currency)
                .await?
                .ok_or_else(|| {
                    anyhow!(
                        "Source '{}' targets unknown currency '{}'",
                        source.name,
                        source.target_currency
                    )
                })?;
            let company_id = match &source.company {
                Some(name) => Some(self.company_id(name).await?.ok_or_else(|| {
                    anyhow!(
                        "Source '{}' references unknown company '{}'",
                        source.name,
                        name
                    )
                })?),
                None => None,
            };

            let existing = self
                .repos
                .sources
                .find_first(|s| s.name == source.name)
                .await?;
            match existing {
                Some(stored) => {
                    self.repos
                        .sources
                        .update(stored.id, |s| {
                            s.base_url = source.base_url.clone();
                            s.api_key = source.api_key.clone();
                            s.target_currency_id = currency_id;
                            s.company_id = company_id;
                            s.active = source.active;
                        })
                        .await
                        .with_context(|| format!("Failed to update source '{}'", source.name))?;
                    debug!("Refreshed rate source '{}'", source.name);
                }
                None => {
                    self.repos
                        .sources
                        .create(|id| RateSource {
                            id,
                            name: source.name.clone(),
                            base_url: source.base_url.clone(),
                            api_key: source.api_key.clone(),
                            target_currency_id: currency_id,
                            company_id,
                            active: source.active,
                            last_response: None,
                            last_call: None,
                        })
                        .await
                        .with_context(|| format!("Failed to create source '{}'", source.name))?;
                    info!("Registered rate source '{}'", source.name);
                }
            }
        }
        Ok(())
    }

    async fn currency_id(&self, code: &str) -> Result<Option<RecordId>> {
        let found = self
            .repos
            .currencies
            .find_first(|c| c.code.eq_ignore_ascii_case(code))
            .await?;
        Ok(found.map(|c| c.id))
    }

    async fn company_id(&self, name: &str) -> Result<Option<RecordId>> {
        let found = self.repos.companies.find_first(|c| c.name == name).await?;
        Ok(found.map(|c| c.id))
    }

    async fn ensure_currency(&self, code: &str, name: Option<String>) -> Result<()> {
        let code = code.to_uppercase();
        match self.repos.currencies.find_first(|c| c.code == code).await? {
            Some(existing) if name.is_some() && existing.name != name => {
                self.repos
                    .currencies
                    .update(existing.id, |c| c.name = name)
                    .await?;
            }
            Some(_) => {}
            None => {
                self.repos
                    .currencies
                    .create(|id| Currency {
                        id,
                        code: code.clone(),
                        name,
                    })
                    .await?;
                info!("Registered currency {code}");
            }
        }
        Ok(())
    }

    async fn ensure_company(&self, name: &str) -> Result<()> {
        if self.company_id(name).await?.is_none() {
            self.repos
                .companies
                .create(|id| Company {
                    id,
                    name: name.to_string(),
                })
                .await?;
            info!("Registered company {name}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValueStore;
    use chrono::Utc;

    fn config(yaml: &str) -> AppConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    const CONFIG: &str = r#"
currencies:
  - code: usd
  - code: PEN
companies:
  - name: Acme
sources:
  - name: sunat
    base_url: http://example.com/a
    api_key: k1
    company: Acme
"#;

    #[tokio::test]
    async fn test_apply_creates_records() {
        let store = KeyValueStore::in_memory();
        let repos = Repositories::open(&store).unwrap();

        Catalog::new(&repos).apply(&config(CONFIG)).await.unwrap();

        let currencies = repos.currencies.all().await.unwrap();
        assert_eq!(
            currencies
                .iter()
                .map(|c| c.code.as_str())
                .collect::<Vec<_>>(),
            vec!["USD", "PEN"]
        );
        let sources = repos.sources.all().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].target_currency_id, currencies[0].id);
        assert_eq!(sources[0].company_id, Some(1));
        assert!(sources[0].active);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_and_keeps_audit() {
        let store = KeyValueStore::in_memory();
        let repos = Repositories::open(&store).unwrap();
        let catalog = Catalog::new(&repos);
        catalog.apply(&config(CONFIG)).await.unwrap();

        let called_at = Utc::now();
        repos
            .sources
            .update(1, |s| {
                s.last_response = Some("A".to_string());
                s.last_call = Some(called_at);
            })
            .await
            .unwrap();

        let edited = CONFIG
            .replace("http://example.com/a", "http://example.com/b")
            .replace("    company: Acme\n", "    company: Acme\n    active: false\n");
        catalog.apply(&config(&edited)).await.unwrap();

        assert_eq!(repos.currencies.all().await.unwrap().len(), 2);
        let sources = repos.sources.all().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].base_url, "http://example.com/b");
        assert!(!sources[0].active);
        assert_eq!(sources[0].last_response.as_deref(), Some("A"));
        assert_eq!(sources[0].last_call, Some(called_at));
    }

    #[tokio::test]
    async fn test_apply_rejects_duplicate_source_names() {
        let store = KeyValueStore::in_memory();
        let repos = Repositories::open(&store).unwrap();

        let err = Catalog::new(&repos)
            .apply(&config(
                r#"
currencies:
  - code: USD
sources:
  - base_url: http://a
  - base_url: http://b
"#,
            ))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'Exchange rate API to USD'"), "{message}");
        assert!(message.contains("more than once"), "{message}");
        assert!(repos.sources.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_rejects_unknown_currency() {
        let store = KeyValueStore::in_memory();
        let repos = Repositories::open(&store).unwrap();

        let err = Catalog::new(&repos)
            .apply(&config(
                r#"
sources:
  - name: sunat
    target_currency: EUR
"#,
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown currency 'EUR'"));
    }

    #[tokio::test]
    async fn test_apply_rejects_unknown_company() {
        let store = KeyValueStore::in_memory();
        let repos = Repositories::open(&store).unwrap();

        let err = Catalog::new(&repos)
            .apply(&config(
                r#"
currencies:
  - code: USD
sources:
  - name: sunat
    company: Nobody
"#,
            ))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown company 'Nobody'"));
    }
}
