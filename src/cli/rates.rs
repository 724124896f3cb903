use super::ui;
use crate::core::model::{Company, Currency, CurrencyRate, RateSource, RecordId};
use crate::core::repository::Repositories;
use anyhow::{Result, bail};
use comfy_table::Cell;
use std::collections::HashMap;

struct Names {
    currencies: HashMap<RecordId, String>,
    companies: HashMap<RecordId, String>,
}

impl Names {
    async fn load(repos: &Repositories) -> Result<Self> {
        let currencies = repos
            .currencies
            .all()
            .await?
            .into_iter()
            .map(|c: Currency| (c.id, c.code))
            .collect();
        let companies = repos
            .companies
            .all()
            .await?
            .into_iter()
            .map(|c: Company| (c.id, c.name))
            .collect();
        Ok(Self {
            currencies,
            companies,
        })
    }

    fn currency(&self, id: RecordId) -> String {
        self.currencies
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{id}"))
    }

    fn company(&self, id: Option<RecordId>) -> String {
        match id {
            Some(id) => self
                .companies
                .get(&id)
                .cloned()
                .unwrap_or_else(|| format!("#{id}")),
            None => "(global)".to_string(),
        }
    }
}

fn render_sources(sources: &[RateSource], names: &Names) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Name"),
        ui::header_cell("Endpoint"),
        ui::header_cell("Currency"),
        ui::header_cell("Company"),
        ui::header_cell("Active"),
        ui::header_cell("Last call"),
    ]);

    for source in sources {
        table.add_row(vec![
            Cell::new(&source.name),
            Cell::new(&source.base_url),
            Cell::new(names.currency(source.target_currency_id)),
            Cell::new(names.company(source.company_id)),
            ui::flag_cell(source.active),
            ui::format_optional_cell(source.last_call, |t| {
                t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
            }),
        ]);
    }
    table.to_string()
}

fn render_rates(rates: &[CurrencyRate], names: &Names) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Currency"),
        ui::header_cell("Company"),
        ui::header_cell("Rate"),
    ]);

    for rate in rates {
        table.add_row(vec![
            Cell::new(rate.date.to_string()),
            Cell::new(names.currency(rate.currency_id)),
            Cell::new(names.company(rate.company_id)),
            ui::number_cell(format!("{:.6}", rate.rate)),
        ]);
    }
    table.to_string()
}

pub async fn show_sources(repos: &Repositories) -> Result<()> {
    let sources = repos.sources.all().await?;
    if sources.is_empty() {
        println!(
            "{}",
            ui::style_text("No rate sources configured", ui::StyleType::Subtle)
        );
        return Ok(());
    }
    let names = Names::load(repos).await?;
    println!(
        "{}\n",
        ui::style_text("Rate sources", ui::StyleType::Title)
    );
    println!("{}", render_sources(&sources, &names));
    Ok(())
}

/// Prints stored rates, newest first, optionally for one currency code.
pub async fn show_rates(repos: &Repositories, currency: Option<&str>) -> Result<()> {
    let names = Names::load(repos).await?;

    let currency_id = match currency {
        Some(code) => match names
            .currencies
            .iter()
            .find(|(_, c)| c.eq_ignore_ascii_case(code))
        {
            Some((id, _)) => Some(*id),
            None => bail!("Unknown currency: {code}"),
        },
        None => None,
    };

    let mut rates = repos
        .rates
        .search(|r| currency_id.is_none_or(|id| r.currency_id == id))
        .await?;
    rates.sort_by(|a, b| b.date.cmp(&a.date).then(a.currency_id.cmp(&b.currency_id)));

    if rates.is_empty() {
        println!(
            "{}",
            ui::style_text("No exchange rates stored", ui::StyleType::Subtle)
        );
        return Ok(());
    }
    println!(
        "{}\n",
        ui::style_text("Exchange rates", ui::StyleType::Title)
    );
    println!("{}", render_rates(&rates, &names));
    Ok(())
}
