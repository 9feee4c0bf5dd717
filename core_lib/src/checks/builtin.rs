//! Generic contracts shipped with the aggregator.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::json;
use std::time::Duration;

use super::contract::{CheckContract, CheckOutcome, ContractRegistry};
use super::params::{CheckParams, ParamType, ParamValue, ParameterSchema};
use crate::error::Result;
use crate::fanout::FanOut;
use crate::fetch::{FetchOptions, Fetcher};

/// URL should return a 200 response.
///
/// The remote response is returned.
pub struct Heartbeat {
    fetcher: Fetcher,
}

impl Heartbeat {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    /// Requested timeout, capped at the fetcher's configured one.
    fn timeout(&self, params: &CheckParams) -> anyhow::Result<Duration> {
        let requested = Duration::from_secs(params.int("timeout")?.max(1) as u64);
        Ok(requested.min(self.fetcher.timeout()))
    }
}

#[async_trait]
impl CheckContract for Heartbeat {
    fn id(&self) -> &str {
        "core.heartbeat"
    }

    fn documentation(&self) -> &str {
        "URL should return a 200 response.\n\nThe remote response is returned."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("url", ParamType::Str)
            .optional("timeout", ParamType::Int, ParamValue::Int(5))
            .overridable(&["timeout"])
            .exposed(&["url"])
    }

    async fn run(&self, params: &CheckParams) -> anyhow::Result<CheckOutcome> {
        let url = params.str("url")?;
        let options = FetchOptions::default().with_timeout(self.timeout(params)?);

        let response = match self.fetcher.fetch(url, Method::GET, &options).await {
            Ok(response) => response,
            Err(e) => return Ok(CheckOutcome::failure(json!(e.to_string()))),
        };

        let healthy = response.status() == StatusCode::OK;
        match response.json::<serde_json::Value>().await {
            Ok(body) => Ok(CheckOutcome::from_parts(healthy, body)),
            Err(e) => Ok(CheckOutcome::failure(json!(e.to_string()))),
        }
    }
}

/// Every listed URL should answer a HEAD request with a 200.
///
/// The unreachable URLs are returned along with the number of checked URLs.
pub struct Availability {
    fetcher: Fetcher,
    fanout: FanOut,
}

impl Availability {
    pub fn new(fetcher: Fetcher, fanout: FanOut) -> Self {
        Self { fetcher, fanout }
    }
}

async fn probe(fetcher: &Fetcher, url: &str) -> std::result::Result<(), String> {
    match fetcher.fetch_head(url).await {
        Ok((StatusCode::OK, _)) => Ok(()),
        Ok((status, _)) => Err(format!("status {}", status.as_u16())),
        Err(e) => Err(e.to_string()),
    }
}

async fn probe_all(fetcher: &Fetcher, fanout: &FanOut, urls: &[String]) -> CheckOutcome {
    let outcomes = fanout
        .gather_outcomes(urls.iter().map(|url| probe(fetcher, url)))
        .await;

    let missing: Vec<serde_json::Value> = urls
        .iter()
        .zip(outcomes)
        .filter_map(|(url, outcome)| {
            outcome
                .err()
                .map(|reason| json!({ "url": url, "reason": reason }))
        })
        .collect();

    CheckOutcome::from_parts(
        missing.is_empty(),
        json!({ "missing": missing, "checked": urls.len() }),
    )
}

#[async_trait]
impl CheckContract for Availability {
    fn id(&self) -> &str {
        "core.availability"
    }

    fn documentation(&self) -> &str {
        "Every listed URL should answer a HEAD request with a 200.\n\n\
         The unreachable URLs are returned along with the number of checked URLs."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("urls", ParamType::List)
            .exposed(&["urls"])
    }

    async fn run(&self, params: &CheckParams) -> anyhow::Result<CheckOutcome> {
        let urls = params.list("urls")?;
        Ok(probe_all(&self.fetcher, &self.fanout, urls).await)
    }
}

/// Every URL listed in the manifests should be available.
///
/// Each manifest is a JSON array of URLs. All manifests must be fetched before
/// probing starts; the unreachable URLs are returned along with the number of
/// checked URLs.
pub struct ManifestAvailability {
    fetcher: Fetcher,
    fanout: FanOut,
}

impl ManifestAvailability {
    pub fn new(fetcher: Fetcher, fanout: FanOut) -> Self {
        Self { fetcher, fanout }
    }
}

#[async_trait]
impl CheckContract for ManifestAvailability {
    fn id(&self) -> &str {
        "core.manifest_availability"
    }

    fn documentation(&self) -> &str {
        "Every URL listed in the manifests should be available.\n\n\
         The unreachable URLs are returned along with the number of checked URLs."
    }

    fn schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("manifests", ParamType::List)
            .exposed(&["manifests"])
    }

    async fn run(&self, params: &CheckParams) -> anyhow::Result<CheckOutcome> {
        let manifests = params.list("manifests")?;

        let listed = self
            .fanout
            .gather_all(
                manifests
                    .iter()
                    .map(|url| self.fetcher.fetch_json::<Vec<String>>(url)),
            )
            .await;

        let urls: Vec<String> = match listed {
            Ok(lists) => lists.into_iter().flatten().collect(),
            Err(e) => {
                return Ok(CheckOutcome::failure(json!({
                    "error": format!("cannot fetch manifest: {}", e),
                })))
            }
        };

        Ok(probe_all(&self.fetcher, &self.fanout, &urls).await)
    }
}

impl ContractRegistry {
    /// Registry holding every built-in contract.
    pub fn with_builtins(fetcher: Fetcher, fanout: FanOut) -> Result<Self> {
        ContractRegistry::new()
            .with(Heartbeat::new(fetcher.clone()))?
            .with(Availability::new(fetcher.clone(), fanout.clone()))?
            .with(ManifestAvailability::new(fetcher, fanout))
    }
}
