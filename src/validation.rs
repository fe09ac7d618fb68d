//! Schema validation helpers.
//!
//! Validates a `serde_json::Value` against a [`Schema`]: presence of required
//! attributes, attribute types, nested single blocks, and the named
//! [`Validator`] hooks attached to attributes.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_azure_cosmos::schema::{Attribute, Schema, Validator};
//! use hemmer_provider_azure_cosmos::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "throughput",
//!         Attribute::optional_int64().with_validator(Validator::CosmosThroughput),
//!     );
//!
//! assert!(validate(&schema, &json!({"name": "db", "throughput": 400})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "db", "throughput": 450}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("throughput".to_string()));
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::schema::{Attribute, AttributeType, Block, Diagnostic, NestedBlock, Schema, Validator};

/// Maximum number of tags Azure allows on a single resource.
pub const MAX_TAGS: usize = 50;
/// Maximum tag key length in characters.
pub const MAX_TAG_KEY_LENGTH: usize = 512;
/// Maximum tag value length in characters.
pub const MAX_TAG_VALUE_LENGTH: usize = 256;
/// Smallest throughput Cosmos DB will provision.
pub const MIN_THROUGHPUT: i64 = 400;
/// Throughput must be set in steps of this size.
pub const THROUGHPUT_STEP: i64 = 100;

static COSMOS_ACCOUNT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-a-z0-9]{3,50}$").expect("valid regex"));

static RESOURCE_GROUP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-\w._()]+$").expect("valid regex"));

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed-only attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - Attribute validators run on present, correctly typed values
/// - Nested blocks are validated recursively
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Run a named validator against a single value.
///
/// `path` is used as the attribute path of any diagnostics produced.
pub fn run_validator(validator: Validator, value: &Value, path: &str) -> Vec<Diagnostic> {
    let messages = match validator {
        Validator::CosmosEntityName => string_rule(value, path, validate_cosmos_entity_name),
        Validator::CosmosAccountName => string_rule(value, path, validate_cosmos_account_name),
        Validator::ResourceGroupName => string_rule(value, path, validate_resource_group_name),
        Validator::Duration => string_rule(value, path, validate_duration),
        Validator::CosmosThroughput => match value.as_i64() {
            Some(v) => validate_cosmos_throughput(v, path),
            None => vec![format!("expected type of {} to be integer", path)],
        },
        Validator::Tags => validate_tags(value),
    };

    messages
        .into_iter()
        .map(|msg| Diagnostic::error(msg).with_attribute(path))
        .collect()
}

fn string_rule(value: &Value, path: &str, rule: fn(&str, &str) -> Vec<String>) -> Vec<String> {
    match value.as_str() {
        Some(s) => rule(s, path),
        None => vec![format!("expected type of {} to be string", path)],
    }
}

/// Cosmos DB entity (database/collection) names: 1 to 255 characters, no
/// trailing space, and none of `/ \ # ?`.
pub fn validate_cosmos_entity_name(value: &str, key: &str) -> Vec<String> {
    let mut errors = Vec::new();

    let length = value.chars().count();
    if !(1..=255).contains(&length) {
        errors.push(format!("{} length must be between 1 and 255 characters", key));
    }

    if value.ends_with(' ') {
        errors.push(format!("{} cannot end with a white space", key));
    }

    if value.contains(&['/', '\\', '#', '?'][..]) {
        errors.push(format!("{} cannot contain the characters /, \\, #, ?", key));
    }

    errors
}

/// Cosmos DB account names: 3 to 50 lowercase letters, digits or hyphens.
pub fn validate_cosmos_account_name(value: &str, key: &str) -> Vec<String> {
    if COSMOS_ACCOUNT_NAME.is_match(value) {
        Vec::new()
    } else {
        vec![format!(
            "{} name must be 3 - 50 characters long, contain only lowercase letters, numbers and hyphens.",
            key
        )]
    }
}

/// Cosmos DB throughput: at least 400 and a multiple of 100.
pub fn validate_cosmos_throughput(value: i64, key: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if value < MIN_THROUGHPUT {
        errors.push(format!("{} must be a minimum of {}", key, MIN_THROUGHPUT));
    }

    if value % THROUGHPUT_STEP != 0 {
        errors.push(format!("{} must be set in increments of {}", key, THROUGHPUT_STEP));
    }

    errors
}

/// Azure resource group names.
pub fn validate_resource_group_name(value: &str, key: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if value.is_empty() {
        errors.push(format!("{} cannot be blank", key));
    }

    if value.chars().count() > 90 {
        errors.push(format!("{} may not exceed 90 characters in length", key));
    }

    if value.ends_with('.') {
        errors.push(format!("{} may not end with a period", key));
    }

    if !value.is_empty() && !RESOURCE_GROUP_NAME.is_match(value) {
        errors.push(format!(
            "{} may only contain alphanumeric characters, dash, underscores, parentheses and periods",
            key
        ));
    }

    errors
}

/// Duration strings accepted by `humantime`, e.g. `30m` or `1h 30m`.
pub fn validate_duration(value: &str, key: &str) -> Vec<String> {
    match humantime_serde::re::humantime::parse_duration(value) {
        Ok(_) => Vec::new(),
        Err(e) => vec![format!("{} is not a valid duration: {}", key, e)],
    }
}

/// Azure resource tags: at most 50 entries, string values, keys up to 512
/// characters and values up to 256.
pub fn validate_tags(value: &Value) -> Vec<String> {
    let tags = match value {
        Value::Object(tags) => tags,
        Value::Null => return Vec::new(),
        other => return vec![format!("expected tags to be a map, got {}", value_type_name(other))],
    };

    let mut errors = Vec::new();

    if tags.len() > MAX_TAGS {
        errors.push(format!(
            "a maximum of {} tags can be applied to each ARM resource",
            MAX_TAGS
        ));
    }

    for (key, tag_value) in tags {
        let key_length = key.chars().count();
        if key_length > MAX_TAG_KEY_LENGTH {
            errors.push(format!(
                "the maximum length for a tag key is {} characters: {:?} is {} characters",
                MAX_TAG_KEY_LENGTH, key, key_length
            ));
        }

        match tag_value.as_str() {
            Some(v) => {
                let value_length = v.chars().count();
                if value_length > MAX_TAG_VALUE_LENGTH {
                    errors.push(format!(
                        "the maximum length for a tag value is {} characters: the value for {:?} is {} characters",
                        MAX_TAG_VALUE_LENGTH, key, value_length
                    ));
                }
            },
            None => errors.push(format!(
                "the value for tag {:?} must be a string, got {}",
                key,
                value_type_name(tag_value)
            )),
        }
    }

    errors
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => {
            // Null is valid for optional blocks, but we can't validate further
            return;
        },
        _ => {
            let diagnostic =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", value_type_name(value)));
            diagnostics.push(if path.is_empty() {
                diagnostic
            } else {
                diagnostic.with_attribute(path)
            });
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Skip computed-only attributes (provider sets these)
    if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() == before {
                if let Some(validator) = attr.validator {
                    diagnostics.extend(run_validator(validator, v, path));
                }
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::Map(value_type) => {
            if let Some(obj) = value.as_object() {
                for (key, val) in obj {
                    let key_path = format!("{}.{}", path, key);
                    validate_attribute_type(value_type, val, &key_path, diagnostics);
                }
            } else {
                diagnostics.push(type_error(path, "map", value));
            }
        },
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => validate_block(&nested.block, v, path, diagnostics),
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
