use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::config::Settings;

/// Off-chain reference prices keyed by symbol.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn fetch_rates(&self) -> Result<HashMap<String, f64>>;
}

/// Client for a CoinGecko-style `simple/price` endpoint.
pub struct PriceOracleClient {
    http: reqwest::Client,
    url: String,
    ids: Vec<(String, String)>,
    vs_currency: String,
}

impl PriceOracleClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.rpc_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            url: settings.price_api_url.clone(),
            ids: settings.price_ids.clone(),
            vs_currency: settings.price_vs_currency.clone(),
        })
    }
}

/// Maps `{ "<id>": { "<vs>": price } }` onto the configured symbols.
/// Ids missing from the response are left out.
pub fn rates_from_response(
    body: &JsonValue,
    ids: &[(String, String)],
    vs_currency: &str,
) -> HashMap<String, f64> {
    let mut out = HashMap::new();
    for (symbol, id) in ids {
        match body
            .get(id)
            .and_then(|v| v.get(vs_currency))
            .and_then(|v| v.as_f64())
        {
            Some(px) => {
                out.insert(symbol.clone(), px);
            }
            None => log::warn!("oracle.missing id={} vs={}", id, vs_currency),
        }
    }
    out
}

#[async_trait]
impl RateSource for PriceOracleClient {
    async fn fetch_rates(&self) -> Result<HashMap<String, f64>> {
        let ids = self
            .ids
            .iter()
            .map(|(_, id)| id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let body: JsonValue = self
            .http
            .get(&self.url)
            .query(&[("ids", ids.as_str()), ("vs_currencies", self.vs_currency.as_str())])
            .send()
            .await
            .with_context(|| format!("price api {}", self.url))?
            .error_for_status()
            .context("price api status")?
            .json()
            .await
            .context("price api body")?;

        let rates = rates_from_response(&body, &self.ids, &self.vs_currency);
        log::debug!("oracle.rates n={}", rates.len());
        Ok(rates)
    }
}
