//! Immutable check declarations, validated against their contract at load.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::contract::{CheckContract, ContractRegistry};
use super::instance::CheckInstance;
use super::params::{CheckParams, ParameterSchema};
use crate::config::CheckDeclaration;
use crate::error::{AppError, Result};

pub struct CheckDescriptor {
    pub project: String,
    pub name: String,
    pub description: String,
    pub documentation: String,
    pub tags: Vec<String>,
    pub troubleshooting: Option<String>,
    pub ttl_seconds: u64,
    pub schema: ParameterSchema,
    pub contract: Arc<dyn CheckContract>,
    defaults: CheckParams,
}

impl std::fmt::Debug for CheckDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckDescriptor")
            .field("project", &self.project)
            .field("name", &self.name)
            .field("contract", &self.contract.id())
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

/// Public description of a check, as listed on `/checks`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckInfo {
    pub name: String,
    pub project: String,
    pub module: String,
    pub description: String,
    pub documentation: String,
    pub url: String,
    pub tags: Vec<String>,
    pub ttl: u64,
    pub troubleshooting: Option<String>,
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl CheckDescriptor {
    pub fn contract_id(&self) -> &str {
        self.contract.id()
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn url(&self) -> String {
        format!("/checks/{}/{}", self.project, self.name)
    }

    pub fn overridable(&self) -> &BTreeSet<String> {
        self.schema.overridable_names()
    }

    pub fn exposed(&self) -> &BTreeSet<String> {
        self.schema.exposed_names()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn defaults(&self) -> &CheckParams {
        &self.defaults
    }

    /// The instance running with configured parameters only.
    pub fn default_instance(self: &Arc<Self>) -> CheckInstance {
        CheckInstance::new(Arc::clone(self), self.defaults.clone())
    }

    pub fn info(self: &Arc<Self>) -> CheckInfo {
        self.default_instance().info()
    }

    fn from_declaration(
        declaration: &CheckDeclaration,
        contracts: &ContractRegistry,
        default_ttl: u64,
    ) -> Result<Self> {
        let label = format!("{}/{}", declaration.project, declaration.name);

        let contract = contracts.resolve(&declaration.module).ok_or_else(|| {
            AppError::Configuration(format!(
                "unknown module '{}' for '{}'",
                declaration.module, label
            ))
        })?;
        let schema = contract.schema();

        let undeclared = schema.undeclared_names();
        if !undeclared.is_empty() {
            return Err(AppError::Configuration(format!(
                "module '{}' allows undeclared parameters: {}",
                declaration.module,
                undeclared.join(", ")
            )));
        }

        let ttl_seconds = declaration.ttl.unwrap_or(default_ttl);
        if ttl_seconds == 0 {
            return Err(AppError::Configuration(format!(
                "ttl for '{}' must be greater than 0",
                label
            )));
        }

        let mut values = BTreeMap::new();
        for (param, raw) in &declaration.params {
            let spec = schema.get(param).ok_or_else(|| {
                AppError::Configuration(format!(
                    "unknown parameter '{}' for '{}'",
                    param, declaration.module
                ))
            })?;
            let value = spec.ty.coerce_json(raw).map_err(|e| {
                AppError::Configuration(format!("parameter '{}' of '{}': {}", param, label, e))
            })?;
            values.insert(param.clone(), value);
        }

        for (param, spec) in schema.iter() {
            if values.contains_key(param) {
                continue;
            }
            match &spec.default {
                Some(default) => {
                    values.insert(param.clone(), default.clone());
                }
                None => {
                    return Err(AppError::Configuration(format!(
                        "missing required parameter '{}' for '{}'",
                        param, label
                    )));
                }
            }
        }

        Ok(Self {
            project: declaration.project.clone(),
            name: declaration.name.clone(),
            description: declaration.description.clone(),
            documentation: contract.documentation().trim().to_string(),
            tags: declaration.tags.clone(),
            troubleshooting: declaration.troubleshooting.clone(),
            ttl_seconds,
            schema,
            contract,
            defaults: CheckParams::new(values),
        })
    }
}

/// Every check declared in the loaded configuration, in declaration order.
#[derive(Debug, Default)]
pub struct CheckRegistry {
    checks: Vec<Arc<CheckDescriptor>>,
}

impl CheckRegistry {
    pub fn load(
        declarations: &[CheckDeclaration],
        contracts: &ContractRegistry,
        default_ttl: u64,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut checks = Vec::with_capacity(declarations.len());

        for declaration in declarations {
            if !seen.insert((declaration.project.as_str(), declaration.name.as_str())) {
                return Err(AppError::Configuration(format!(
                    "duplicate check '{}/{}'",
                    declaration.project, declaration.name
                )));
            }

            let descriptor = CheckDescriptor::from_declaration(declaration, contracts, default_ttl)?;
            debug!(
                project = %descriptor.project,
                name = %descriptor.name,
                module = %descriptor.contract_id(),
                ttl = descriptor.ttl_seconds,
                "Loaded check"
            );
            checks.push(Arc::new(descriptor));
        }

        info!("Loaded {} checks", checks.len());
        Ok(Self { checks })
    }

    pub fn all(&self) -> &[Arc<CheckDescriptor>] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn by_project(&self, project: &str) -> Result<Vec<Arc<CheckDescriptor>>> {
        let selected: Vec<_> = self
            .checks
            .iter()
            .filter(|c| c.project == project)
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(AppError::NotFound(format!("Unknown project '{}'", project)));
        }
        Ok(selected)
    }

    pub fn get(&self, project: &str, name: &str) -> Result<Arc<CheckDescriptor>> {
        self.by_project(project)?
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| AppError::NotFound(format!("Unknown check '{}/{}'", project, name)))
    }

    pub fn by_tag(&self, tag: &str) -> Result<Vec<Arc<CheckDescriptor>>> {
        let selected: Vec<_> = self.checks.iter().filter(|c| c.has_tag(tag)).cloned().collect();

        if selected.is_empty() {
            return Err(AppError::NotFound(format!("No check with tag '{}'", tag)));
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::contract::{CheckOutcome, FnContract};
    use crate::checks::params::{ParamType, ParamValue};
    use serde_json::json;

    fn contracts() -> ContractRegistry {
        let schema = ParameterSchema::new()
            .required("url", ParamType::Str)
            .optional("max_age", ParamType::Int, ParamValue::Int(10))
            .overridable(&["max_age"])
            .exposed(&["url", "max_age"]);

        ContractRegistry::new()
            .with(
                FnContract::new("test.noop", schema, |_| async { Ok(CheckOutcome::success(json!({}))) })
                    .with_documentation("\n  Probe is reachable.\n"),
            )
            .unwrap()
    }

    fn declaration(project: &str, name: &str) -> CheckDeclaration {
        CheckDeclaration {
            project: project.to_string(),
            name: name.to_string(),
            description: "Probe".to_string(),
            module: "test.noop".to_string(),
            ttl: None,
            tags: vec!["ops".to_string()],
            troubleshooting: None,
            params: BTreeMap::from([("url".to_string(), json!("http://x/health"))]),
        }
    }

    #[test]
    fn test_load_fills_defaults_and_ttl() {
        let registry = CheckRegistry::load(&[declaration("p", "a")], &contracts(), 60).unwrap();
        let check = registry.get("p", "a").unwrap();

        assert_eq!(check.ttl_seconds, 60);
        assert_eq!(check.documentation, "Probe is reachable.");
        let instance = check.default_instance();
        assert_eq!(instance.params().int("max_age").unwrap(), 10);
        assert_eq!(instance.params().str("url").unwrap(), "http://x/health");
    }

    #[test]
    fn test_duplicate_check_is_configuration_error() {
        let err = CheckRegistry::load(&[declaration("p", "a"), declaration("p", "a")], &contracts(), 60)
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn test_unknown_module_is_configuration_error() {
        let mut decl = declaration("p", "a");
        decl.module = "checks.missing".to_string();

        let err = CheckRegistry::load(&[decl], &contracts(), 60).unwrap_err();
        assert!(matches!(err, AppError::Configuration(msg) if msg.contains("unknown module")));
    }

    #[test]
    fn test_unknown_parameter_is_configuration_error() {
        let mut decl = declaration("p", "a");
        decl.params.insert("api_key".to_string(), json!("secret"));

        let err = CheckRegistry::load(&[decl], &contracts(), 60).unwrap_err();
        assert!(matches!(err, AppError::Configuration(msg) if msg.contains("unknown parameter")));
    }

    #[test]
    fn test_missing_required_and_bad_type_are_rejected() {
        let mut decl = declaration("p", "a");
        decl.params.clear();
        assert!(CheckRegistry::load(&[decl], &contracts(), 60).is_err());

        let mut decl = declaration("p", "a");
        decl.params.insert("max_age".to_string(), json!("soon"));
        assert!(CheckRegistry::load(&[decl], &contracts(), 60).is_err());

        let mut decl = declaration("p", "a");
        decl.ttl = Some(0);
        assert!(CheckRegistry::load(&[decl], &contracts(), 60).is_err());
    }

    #[test]
    fn test_lookup_by_project_and_tag() {
        let mut other = declaration("q", "c");
        other.tags = vec![];
        let registry =
            CheckRegistry::load(&[declaration("p", "a"), declaration("p", "b"), other], &contracts(), 60)
                .unwrap();

        assert_eq!(registry.by_project("p").unwrap().len(), 2);
        assert!(matches!(registry.by_project("zzz"), Err(AppError::NotFound(_))));
        assert!(matches!(registry.get("p", "zzz"), Err(AppError::NotFound(_))));
        assert_eq!(registry.by_tag("ops").unwrap().len(), 2);
        assert!(registry.by_tag("unknown").is_err());
    }
}
