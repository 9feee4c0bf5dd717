//! Decides between cached and fresh results, runs contracts and raises
//! transition alerts.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::alert::{AlertContext, AlertSink};
use crate::cache::{CacheEntry, ResultCache};
use crate::checks::{CheckDescriptor, CheckInfo, CheckInstance, CheckOutcome, CheckRegistry};
use crate::error::{AppError, Result};
use crate::fanout::FanOut;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthState {
    NeverRun,
    Healthy,
    Failing,
}

impl HealthState {
    /// State implied by the entry about to be replaced.
    pub fn from_entry(entry: Option<&CacheEntry>) -> Self {
        match entry {
            None => HealthState::NeverRun,
            Some(entry) if entry.success => HealthState::Healthy,
            Some(_) => HealthState::Failing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Failing,
    Recovered,
}

impl Transition {
    pub fn message(&self, project: &str, name: &str) -> String {
        match self {
            Transition::Failing => format!("{}/{} is failing", project, name),
            Transition::Recovered => format!("{}/{} recovered", project, name),
        }
    }
}

/// The alert owed when a run with outcome `success` follows `previous`.
pub fn transition(previous: HealthState, success: bool) -> Option<Transition> {
    match (previous, success) {
        (HealthState::NeverRun, false) | (HealthState::Healthy, false) => Some(Transition::Failing),
        (HealthState::Failing, true) => Some(Transition::Recovered),
        _ => None,
    }
}

/// A check result as served to callers.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    #[serde(flatten)]
    pub info: CheckInfo,
    pub datetime: DateTime<Utc>,
    /// Milliseconds.
    pub duration: u64,
    pub success: bool,
    pub data: serde_json::Value,
}

impl CheckReport {
    fn new(instance: &CheckInstance, entry: CacheEntry) -> Self {
        Self {
            info: instance.info(),
            datetime: entry.timestamp,
            duration: entry.duration_millis,
            success: entry.success,
            data: entry.data,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "check panicked".to_string()
    }
}

pub struct Orchestrator {
    registry: Arc<CheckRegistry>,
    cache: ResultCache,
    alerts: Arc<dyn AlertSink>,
    refresh_secret: Option<String>,
}

impl Orchestrator {
    pub fn new(registry: Arc<CheckRegistry>, cache: ResultCache, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            registry,
            cache,
            alerts,
            refresh_secret: None,
        }
    }

    pub fn with_refresh_secret(mut self, secret: Option<String>) -> Self {
        self.refresh_secret = secret;
        self
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn list_checks(&self) -> Vec<CheckInfo> {
        self.registry.all().iter().map(|c| c.info()).collect()
    }

    fn authorize_refresh(&self, token: Option<&str>) -> Result<bool> {
        match (token, self.refresh_secret.as_deref()) {
            (None, _) => Ok(false),
            (Some(token), Some(secret)) if token == secret => Ok(true),
            (Some(_), Some(_)) => Err(AppError::BadRequest("Invalid refresh token".to_string())),
            (Some(_), None) => Err(AppError::BadRequest("Refresh is not enabled".to_string())),
        }
    }

    /// Result for one check, bound to the caller's overrides. Re-executes when
    /// nothing fresh is cached or a valid refresh token is given.
    pub async fn run_check(
        &self,
        project: &str,
        name: &str,
        overrides: &BTreeMap<String, String>,
        refresh: Option<&str>,
    ) -> Result<CheckReport> {
        let descriptor = self.registry.get(project, name)?;
        let instance = descriptor
            .default_instance()
            .bind(overrides.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        let force = self.authorize_refresh(refresh)?;

        Ok(self.run_instance(&instance, force).await)
    }

    pub async fn run_checks_by_project(&self, project: &str) -> Result<Vec<CheckReport>> {
        let checks = self.registry.by_project(project)?;
        Ok(self.run_defaults(&checks).await)
    }

    pub async fn run_checks_by_tag(&self, tag: &str) -> Result<Vec<CheckReport>> {
        let checks = self.registry.by_tag(tag)?;
        Ok(self.run_defaults(&checks).await)
    }

    /// Runs the default instances concurrently. Reports keep their own
    /// success flags, in registry order. Unbounded here: the outbound gate
    /// lives inside the contracts, and nesting it would let checks starve
    /// their own probes.
    async fn run_defaults(&self, checks: &[Arc<CheckDescriptor>]) -> Vec<CheckReport> {
        let instances: Vec<CheckInstance> = checks.iter().map(|c| c.default_instance()).collect();
        FanOut::unbounded()
            .join(instances.iter().map(|instance| self.run_instance(instance, false)))
            .await
    }

    pub async fn run_instance(&self, instance: &CheckInstance, force: bool) -> CheckReport {
        let key = instance.cache_key();
        let previous = self.cache.peek(&key);

        if !force {
            if let Some(entry) = self.cache.get(&key) {
                debug!("Serving cached result for {}", key);
                return CheckReport::new(instance, entry);
            }
        }

        let entry = self.execute(instance).await;
        let descriptor = instance.descriptor();
        if instance.is_default() {
            self.cache.set_pinned(&key, entry.clone(), descriptor.ttl());
        } else {
            self.cache.set(&key, entry.clone(), descriptor.ttl());
        }

        let state = HealthState::from_entry(previous.as_ref());
        if let Some(transition) = transition(state, entry.success) {
            let message = transition.message(&descriptor.project, &descriptor.name);
            info!(key = %key, "{}", message);
            self.alerts
                .notify(
                    &message,
                    AlertContext {
                        project: descriptor.project.clone(),
                        name: descriptor.name.clone(),
                        data: entry.data.clone(),
                    },
                )
                .await;
        }

        CheckReport::new(instance, entry)
    }

    /// Runs the contract, turning anything it raises or panics with into a
    /// negative result.
    async fn execute(&self, instance: &CheckInstance) -> CacheEntry {
        let descriptor = instance.descriptor();
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(instance.run()).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(
                    project = %descriptor.project,
                    name = %descriptor.name,
                    error = ?e,
                    "Check raised an unexpected error"
                );
                CheckOutcome::failure(json!({
                    "error": format!("{:#}", e),
                    "kind": "unexpected",
                }))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    project = %descriptor.project,
                    name = %descriptor.name,
                    panic = %message,
                    "Check panicked"
                );
                CheckOutcome::failure(json!({
                    "error": message,
                    "kind": "panic",
                }))
            }
        };

        let duration_millis = started.elapsed().as_millis() as u64;
        if !outcome.success {
            warn!(
                project = %descriptor.project,
                name = %descriptor.name,
                duration_ms = duration_millis,
                "Check failed"
            );
        } else {
            debug!(
                project = %descriptor.project,
                name = %descriptor.name,
                duration_ms = duration_millis,
                "Check passed"
            );
        }

        CacheEntry::new(self.cache.now(), outcome.success, outcome.data, duration_millis)
    }
}
