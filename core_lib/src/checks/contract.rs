//! The executable side of a check and the registry that resolves it by id.

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::params::{CheckParams, ParameterSchema};
use crate::error::{AppError, Result};

/// `(success, data)` as produced by a contract. Expected domain failures are
/// reported here, not raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub success: bool,
    pub data: serde_json::Value,
}

impl CheckOutcome {
    pub fn success(data: serde_json::Value) -> Self {
        Self { success: true, data }
    }

    pub fn failure(data: serde_json::Value) -> Self {
        Self {
            success: false,
            data,
        }
    }

    pub fn from_parts(success: bool, data: serde_json::Value) -> Self {
        Self { success, data }
    }
}

#[async_trait]
pub trait CheckContract: Send + Sync {
    fn id(&self) -> &str;

    fn documentation(&self) -> &str {
        ""
    }

    fn schema(&self) -> ParameterSchema;

    /// An `Err` means something unexpected happened, not that the probed
    /// system is unhealthy.
    async fn run(&self, params: &CheckParams) -> anyhow::Result<CheckOutcome>;
}

type RunFn = dyn Fn(CheckParams) -> BoxFuture<'static, anyhow::Result<CheckOutcome>> + Send + Sync;

/// A contract backed by a closure.
pub struct FnContract {
    id: String,
    documentation: String,
    schema: ParameterSchema,
    run_fn: Box<RunFn>,
}

impl FnContract {
    pub fn new<F, Fut>(id: &str, schema: ParameterSchema, run_fn: F) -> Self
    where
        F: Fn(CheckParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CheckOutcome>> + Send + 'static,
    {
        Self {
            id: id.to_string(),
            documentation: String::new(),
            schema,
            run_fn: Box::new(move |params| run_fn(params).boxed()),
        }
    }

    pub fn with_documentation(mut self, documentation: &str) -> Self {
        self.documentation = documentation.to_string();
        self
    }
}

#[async_trait]
impl CheckContract for FnContract {
    fn id(&self) -> &str {
        &self.id
    }

    fn documentation(&self) -> &str {
        &self.documentation
    }

    fn schema(&self) -> ParameterSchema {
        self.schema.clone()
    }

    async fn run(&self, params: &CheckParams) -> anyhow::Result<CheckOutcome> {
        (self.run_fn)(params.clone()).await
    }
}

/// Maps contract ids to compiled implementations. Populated once at startup.
#[derive(Clone, Default)]
pub struct ContractRegistry {
    contracts: HashMap<String, Arc<dyn CheckContract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: CheckContract + 'static>(&mut self, contract: C) -> Result<()> {
        let id = contract.id().to_string();
        if self.contracts.contains_key(&id) {
            return Err(AppError::Configuration(format!(
                "contract '{}' registered twice",
                id
            )));
        }
        self.contracts.insert(id, Arc::new(contract));
        Ok(())
    }

    pub fn with<C: CheckContract + 'static>(mut self, contract: C) -> Result<Self> {
        self.register(contract)?;
        Ok(self)
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn CheckContract>> {
        self.contracts.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.contracts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::params::ParamType;
    use serde_json::json;

    fn echo() -> FnContract {
        FnContract::new(
            "test.echo",
            ParameterSchema::new().required("value", ParamType::Int),
            |params: CheckParams| async move {
                Ok(CheckOutcome::success(json!({ "value": params.int("value")? })))
            },
        )
    }

    #[test]
    fn test_duplicate_contract_is_rejected() {
        let mut registry = ContractRegistry::new();
        registry.register(echo()).unwrap();

        let err = registry.register(echo()).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_fn_contract_runs_closure() {
        let registry = ContractRegistry::new().with(echo()).unwrap();
        let contract = registry.resolve("test.echo").unwrap();

        let mut params = CheckParams::default();
        params.insert("value".into(), crate::checks::ParamValue::Int(3));

        let outcome = contract.run(&params).await.unwrap();
        assert_eq!(outcome, CheckOutcome::success(json!({"value": 3})));
        assert!(registry.resolve("missing").is_none());
    }
}
