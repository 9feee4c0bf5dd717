//! A descriptor bound to concrete effective parameters.

use std::sync::Arc;

use super::contract::CheckOutcome;
use super::descriptor::{CheckDescriptor, CheckInfo};
use super::params::{CheckParams, ParamValue};
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct CheckInstance {
    descriptor: Arc<CheckDescriptor>,
    params: CheckParams,
}

/// Canonical cache key: `project/name-` followed by the parameters sorted by
/// name. Values are JSON-encoded so separators inside values cannot collide.
pub fn cache_key<'a, I>(project: &str, name: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a ParamValue)>,
{
    let mut pairs: Vec<(&str, String)> = params
        .into_iter()
        .map(|(k, v)| (k, v.to_json().to_string()))
        .collect();
    pairs.sort();

    let encoded: Vec<String> = pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    format!("{}/{}-{}", project, name, encoded.join(","))
}

impl CheckInstance {
    pub(crate) fn new(descriptor: Arc<CheckDescriptor>, params: CheckParams) -> Self {
        Self { descriptor, params }
    }

    pub fn descriptor(&self) -> &Arc<CheckDescriptor> {
        &self.descriptor
    }

    pub fn params(&self) -> &CheckParams {
        &self.params
    }

    /// New instance with caller overrides applied on top of these parameters.
    /// Only overridable names are accepted, each coerced to its declared type.
    pub fn bind<'a, I>(&self, overrides: I) -> Result<CheckInstance>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = self.params.clone();

        for (name, raw) in overrides {
            if !self.descriptor.overridable().contains(name) {
                return Err(AppError::Validation(format!(
                    "parameter '{}' cannot be overridden for '{}/{}'",
                    name, self.descriptor.project, self.descriptor.name
                )));
            }

            let spec = self.descriptor.schema.get(name).ok_or_else(|| {
                AppError::Validation(format!("unknown parameter '{}'", name))
            })?;

            let value = spec
                .ty
                .coerce_str(raw)
                .map_err(|e| AppError::Validation(format!("parameter '{}': {}", name, e)))?;

            params.insert(name.to_string(), value);
        }

        Ok(CheckInstance::new(Arc::clone(&self.descriptor), params))
    }

    /// True when no override changed the configured parameters.
    pub fn is_default(&self) -> bool {
        self.params == *self.descriptor.defaults()
    }

    pub fn cache_key(&self) -> String {
        cache_key(
            &self.descriptor.project,
            &self.descriptor.name,
            self.params.iter().map(|(k, v)| (k.as_str(), v)),
        )
    }

    /// Parameters safe to show in a response. Anything not explicitly exposed,
    /// such as credentials, is left out.
    pub fn exposed_parameters(&self) -> serde_json::Map<String, serde_json::Value> {
        self.params
            .iter()
            .filter(|(name, _)| self.descriptor.exposed().contains(*name))
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }

    pub fn info(&self) -> CheckInfo {
        let d = &self.descriptor;
        CheckInfo {
            name: d.name.clone(),
            project: d.project.clone(),
            module: d.contract_id().to_string(),
            description: d.description.clone(),
            documentation: d.documentation.clone(),
            url: d.url(),
            tags: d.tags.clone(),
            ttl: d.ttl_seconds,
            troubleshooting: d.troubleshooting.clone(),
            parameters: self.exposed_parameters(),
        }
    }

    pub async fn run(&self) -> anyhow::Result<CheckOutcome> {
        self.descriptor.contract.run(&self.params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::contract::{ContractRegistry, FnContract};
    use crate::checks::descriptor::CheckRegistry;
    use crate::checks::params::{ParamType, ParameterSchema};
    use crate::config::CheckDeclaration;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry() -> CheckRegistry {
        let schema = ParameterSchema::new()
            .required("server", ParamType::Str)
            .required("api_key", ParamType::Str)
            .optional("max_age", ParamType::Int, ParamValue::Int(999))
            .overridable(&["max_age"])
            .exposed(&["server", "max_age"]);
        let contracts = ContractRegistry::new()
            .with(FnContract::new("test.fake", schema, |params| async move {
                Ok(CheckOutcome::success(params.to_json()))
            }))
            .unwrap();

        let declaration = CheckDeclaration {
            project: "testproject".into(),
            name: "fake".into(),
            description: "Fake".into(),
            module: "test.fake".into(),
            ttl: Some(60),
            tags: vec![],
            troubleshooting: None,
            params: BTreeMap::from([
                ("server".to_string(), json!("http://server.local")),
                ("api_key".to_string(), json!("hunter2")),
            ]),
        };
        CheckRegistry::load(&[declaration], &contracts, 60).unwrap()
    }

    #[test]
    fn test_bind_applies_overridable_values() {
        let registry = registry();
        let base = registry.get("testproject", "fake").unwrap().default_instance();

        let bound = base.bind([("max_age", "42")]).unwrap();
        assert_eq!(bound.params().int("max_age").unwrap(), 42);
        assert_eq!(base.params().int("max_age").unwrap(), 999);
        assert_ne!(bound.cache_key(), base.cache_key());
        assert!(base.is_default());
        assert!(!bound.is_default());
        assert!(base.bind([("max_age", "999")]).unwrap().is_default());
    }

    #[test]
    fn test_bind_rejects_non_overridable_and_unknown() {
        let registry = registry();
        let base = registry.get("testproject", "fake").unwrap().default_instance();

        assert!(matches!(base.bind([("server", "http://evil")]), Err(AppError::Validation(_))));
        assert!(matches!(base.bind([("unknown", "1")]), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_bind_rejects_uncoercible_value() {
        let registry = registry();
        let base = registry.get("testproject", "fake").unwrap().default_instance();

        let err = base.bind([("max_age", "abc")]).unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.contains("max_age")));
    }

    #[test]
    fn test_exposed_parameters_hide_secrets() {
        let registry = registry();
        let instance = registry.get("testproject", "fake").unwrap().default_instance();

        let exposed = instance.exposed_parameters();
        assert_eq!(exposed.get("server"), Some(&json!("http://server.local")));
        assert_eq!(exposed.get("max_age"), Some(&json!(999)));
        assert!(!exposed.contains_key("api_key"));
    }

    #[test]
    fn test_cache_key_format() {
        let url = ParamValue::Str("http://x/health".into());
        let key = cache_key("p", "hb", [("url", &url)]);
        assert_eq!(key, r#"p/hb-url="http://x/health""#);
    }

    proptest! {
        #[test]
        fn prop_cache_key_ignores_presentation_order(
            params in proptest::collection::btree_map("[a-z_]{1,8}", any::<i64>(), 0..8),
            seed in any::<u64>(),
        ) {
            let values: Vec<(String, ParamValue)> =
                params.into_iter().map(|(k, v)| (k, ParamValue::Int(v))).collect();

            let mut shuffled: Vec<&(String, ParamValue)> = values.iter().collect();
            let len = shuffled.len().max(1);
            shuffled.rotate_left((seed as usize) % len);
            if seed % 2 == 0 {
                shuffled.reverse();
            }

            let ordered = cache_key("p", "n", values.iter().map(|(k, v)| (k.as_str(), v)));
            let reordered = cache_key("p", "n", shuffled.into_iter().map(|(k, v)| (k.as_str(), v)));
            prop_assert_eq!(ordered, reordered);
        }
    }
}
