//! Name-keyed validator factories.
//!
//! Registration happens once at startup through `&mut self`; lookups only need
//! `&self`, so a built registry can be shared across concurrent runs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::validators::Validator;
use crate::validators::builtin::{
    IsJson, JsonSchemaCheck, MaxLength, NonEmpty, PatternCheck, RequiredFields,
};

/// Builds a validator from configuration parameters.
pub type ValidatorFactory = Arc<dyn Fn(&Value) -> anyhow::Result<Validator> + Send + Sync>;

/// Wrap a closure as a [`ValidatorFactory`].
pub fn factory<F>(build: F) -> ValidatorFactory
where
    F: Fn(&Value) -> anyhow::Result<Validator> + Send + Sync + 'static,
{
    Arc::new(build)
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("validator `{0}` is already registered")]
    Duplicate(String),
    #[error("no validator registered under `{0}`")]
    NotFound(String),
    #[error("invalid parameters for validator `{name}`: {source}")]
    InvalidParams {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to construct validator `{name}`: {source:#}")]
    Construction {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Default, Clone)]
pub struct ValidatorRegistry {
    factories: BTreeMap<String, ValidatorFactory>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequiredFieldsParams {
    fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct JsonSchemaParams {
    schema: Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegexParams {
    pattern: String,
    #[serde(default = "default_true")]
    must_match: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MaxLengthParams {
    max_chars: usize,
}

fn default_true() -> bool {
    true
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in deterministic validators.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, ValidatorFactory); 6] = [
            ("non_empty", factory(|_| Ok(Validator::deterministic(NonEmpty)))),
            ("json", factory(|_| Ok(Validator::deterministic(IsJson)))),
            (
                "required_fields",
                factory(|params| {
                    let params: RequiredFieldsParams = parse_params(params)?;
                    Ok(Validator::deterministic(RequiredFields::new(params.fields)?))
                }),
            ),
            (
                "json_schema",
                factory(|params| {
                    let params: JsonSchemaParams = parse_params(params)?;
                    Ok(Validator::deterministic(JsonSchemaCheck::new(&params.schema)?))
                }),
            ),
            (
                "regex",
                factory(|params| {
                    let params: RegexParams = parse_params(params)?;
                    Ok(Validator::deterministic(PatternCheck::new(
                        &params.pattern,
                        params.must_match,
                    )?))
                }),
            ),
            (
                "max_length",
                factory(|params| {
                    let params: MaxLengthParams = parse_params(params)?;
                    Ok(Validator::deterministic(MaxLength::new(params.max_chars)?))
                }),
            ),
        ];
        for (name, factory) in builtins {
            registry.factories.insert(name.to_string(), factory);
        }
        registry
    }

    /// Register `factory` under `name`. Names are unique.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ValidatorFactory,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a fresh validator instance from the factory registered under `name`.
    pub fn create(&self, name: &str, params: &Value) -> Result<Validator, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        factory(params).map_err(|source| match source.downcast::<serde_json::Error>() {
            Ok(source) => RegistryError::InvalidParams {
                name: name.to_string(),
                source,
            },
            Err(source) => RegistryError::Construction {
                name: name.to_string(),
                source,
            },
        })
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Deserialize factory parameters; `null` is treated as an empty table.
pub fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T, serde_json::Error> {
    if params.is_null() {
        return serde_json::from_value(Value::Object(Default::default()));
    }
    serde_json::from_value(params.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::LlmResponse;
    use crate::core::validation::ValidationResult;
    use crate::validators::builtin::FnCheck;
    use serde_json::json;

    #[test]
    fn builtins_are_listed_in_order() {
        let registry = ValidatorRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "json",
                "json_schema",
                "max_length",
                "non_empty",
                "regex",
                "required_fields"
            ]
        );
    }

    #[test]
    fn create_builds_configured_validator() {
        let registry = ValidatorRegistry::with_builtins();
        let validator = registry
            .create("required_fields", &json!({"fields": ["answer"]}))
            .expect("create");
        assert_eq!(validator.name(), "required_fields");
        let Validator::Deterministic(check) = validator else {
            panic!("expected deterministic validator");
        };
        assert!(check.check(&LlmResponse::new(r#"{"answer": 1}"#)).is_valid());
        assert!(!check.check(&LlmResponse::new(r#"{"other": 1}"#)).is_valid());
    }

    #[test]
    fn regex_defaults_to_must_match() {
        let registry = ValidatorRegistry::with_builtins();
        let Validator::Deterministic(check) = registry
            .create("regex", &json!({"pattern": "^\\d+$"}))
            .expect("create")
        else {
            panic!("expected deterministic validator");
        };
        assert!(check.check(&LlmResponse::new("42")).is_valid());
        assert!(!check.check(&LlmResponse::new("forty-two")).is_valid());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ValidatorRegistry::with_builtins();
        let custom = factory(|_| {
            Ok(Validator::deterministic(FnCheck::new("json", |_| {
                ValidationResult::pass()
            })))
        });
        let err = registry.register("json", custom).expect_err("duplicate");
        assert!(matches!(err, RegistryError::Duplicate(name) if name == "json"));
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = ValidatorRegistry::with_builtins();
        let err = registry.create("nope", &Value::Null).expect_err("missing");
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[test]
    fn bad_params_and_bad_values_are_distinguished() {
        let registry = ValidatorRegistry::with_builtins();

        let err = registry
            .create("max_length", &json!({"max_chars": "ten"}))
            .expect_err("wrong type");
        assert!(matches!(err, RegistryError::InvalidParams { .. }), "{err:?}");

        let err = registry
            .create("max_length", &json!({"max_chars": 0}))
            .expect_err("zero limit");
        assert!(matches!(err, RegistryError::Construction { .. }), "{err:?}");

        let err = registry
            .create("regex", &json!({"pattern": "("}))
            .expect_err("bad regex");
        assert!(matches!(err, RegistryError::Construction { .. }), "{err:?}");
    }
}
