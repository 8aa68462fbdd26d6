//! Pre-registered JSON Schema validation for tool arguments.
//!
//! Schemas are compiled once at registration and cached per tool name.
//! Validation reports every error (not just the first), applies top-level
//! property defaults, and never coerces types. Unknown schema keywords are
//! ignored by the engine.

use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::Validator;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ServerError, ServerResult};

/// One flattened validation error.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path of the offending value (`value` for the root)
    pub path: String,
    /// Human-readable message
    pub message: String,
    /// What the schema expected, when the keyword carries one
    pub expected: Option<String>,
}

/// Result of validating one set of arguments.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    /// Whether the arguments satisfied the schema
    pub valid: bool,
    /// All flattened errors; empty when valid
    pub errors: Vec<ValidationIssue>,
}

struct CompiledSchema {
    validator: Validator,
    // (property name, default value) pairs from the top-level schema
    defaults: Vec<(String, Value)>,
}

/// Compile-on-register schema validator.
#[derive(Default)]
pub struct SchemaValidator {
    schemas: RwLock<HashMap<String, CompiledSchema>>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("tools", &self.schemas.read().len())
            .finish()
    }
}

impl SchemaValidator {
    /// Create an empty validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and cache the schema for a tool. Replaces any previous
    /// schema under the same name (live re-registration).
    pub fn register(&self, name: &str, schema: &Value) -> ServerResult<()> {
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            ServerError::Configuration(format!("invalid schema for tool '{name}': {e}"))
        })?;

        let defaults = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|(key, prop)| {
                        prop.get("default").map(|d| (key.clone(), d.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.schemas
            .write()
            .insert(name.to_string(), CompiledSchema { validator, defaults });
        Ok(())
    }

    /// Drop the schema for a tool (live unregistration).
    pub fn unregister(&self, name: &str) {
        self.schemas.write().remove(name);
    }

    /// Whether a schema is registered for `name`.
    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.read().contains_key(name)
    }

    /// Validate arguments against the registered schema, filling in
    /// top-level defaults first. A tool with no schema passes.
    pub fn validate(&self, name: &str, args: &mut Value) -> ValidationOutcome {
        let schemas = self.schemas.read();
        let Some(compiled) = schemas.get(name) else {
            return ValidationOutcome {
                valid: true,
                errors: Vec::new(),
            };
        };

        if let Some(obj) = args.as_object_mut() {
            for (key, default) in &compiled.defaults {
                obj.entry(key.clone()).or_insert_with(|| default.clone());
            }
        }

        let errors: Vec<ValidationIssue> = compiled
            .validator
            .iter_errors(args)
            .map(|e| flatten_error(&e))
            .collect();
        ValidationOutcome {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Validate, failing with a single message joining all errors.
    pub fn validate_or_throw(&self, name: &str, args: &mut Value) -> ServerResult<()> {
        let outcome = self.validate(name, args);
        if outcome.valid {
            return Ok(());
        }
        let message = outcome
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Err(ServerError::Validation { message })
    }
}

fn display_path(pointer: &str) -> String {
    if pointer.is_empty() {
        "value".to_string()
    } else {
        pointer.trim_start_matches('/').replace('/', ".")
    }
}

fn flatten_error(error: &jsonschema::ValidationError<'_>) -> ValidationIssue {
    let path = display_path(&error.instance_path.to_string());
    match &error.kind {
        ValidationErrorKind::Required { property } => {
            let name = property.as_str().map_or_else(|| property.to_string(), str::to_string);
            ValidationIssue {
                path,
                message: format!("Missing required property: {name}"),
                expected: None,
            }
        }
        ValidationErrorKind::Type { kind } => {
            let expected = match kind {
                TypeKind::Single(t) => t.to_string(),
                TypeKind::Multiple(types) => (*types)
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(" or "),
            };
            ValidationIssue {
                message: format!("Property {path} must be {expected}"),
                expected: Some(expected),
                path,
            }
        }
        ValidationErrorKind::Enum { options } => {
            let values = options
                .as_array()
                .map(|opts| {
                    opts.iter()
                        .map(value_literal)
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_else(|| options.to_string());
            ValidationIssue {
                message: format!("Property {path} must be one of: {values}"),
                expected: Some(values),
                path,
            }
        }
        ValidationErrorKind::Minimum { limit } => bounded(path, "at least", limit),
        ValidationErrorKind::Maximum { limit } => bounded(path, "at most", limit),
        ValidationErrorKind::MinLength { limit } => ValidationIssue {
            message: format!("Property {path} must be at least {limit} characters"),
            expected: Some(limit.to_string()),
            path,
        },
        ValidationErrorKind::MaxLength { limit } => ValidationIssue {
            message: format!("Property {path} must be at most {limit} characters"),
            expected: Some(limit.to_string()),
            path,
        },
        ValidationErrorKind::Pattern { pattern } => ValidationIssue {
            message: format!("Property {path} must match pattern {pattern}"),
            expected: Some(pattern.clone()),
            path,
        },
        ValidationErrorKind::AdditionalProperties { unexpected } => ValidationIssue {
            message: format!(
                "Property {path} has unexpected properties: {}",
                unexpected.join(", ")
            ),
            expected: None,
            path,
        },
        _ => {
            let message = error.to_string();
            ValidationIssue {
                message: if message.is_empty() {
                    format!("Validation failed at {path}")
                } else {
                    message
                },
                expected: None,
                path,
            }
        }
    }
}

fn bounded(path: String, bound: &str, limit: &Value) -> ValidationIssue {
    ValidationIssue {
        message: format!("Property {path} must be {bound} {limit}"),
        expected: Some(limit.to_string()),
        path,
    }
}

fn value_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
