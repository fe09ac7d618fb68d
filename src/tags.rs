//! Shared shapes for the `tags` attribute.
//!
//! Resources and data sources that carry Azure tags pick one of these so the
//! attribute looks the same everywhere. Values are checked by
//! [`validate_tags`](crate::validation::validate_tags).

use crate::schema::{Attribute, AttributeFlags, AttributeType, Validator};

/// The conventional attribute name.
pub const TAGS_ATTRIBUTE: &str = "tags";

fn string_map(flags: AttributeFlags) -> Attribute {
    Attribute::new(AttributeType::map(AttributeType::String), flags)
}

/// Tags on a data source: read-only.
pub fn data_source_schema() -> Attribute {
    string_map(AttributeFlags::computed())
}

/// Tags that cannot be changed without recreating the resource.
pub fn force_new_schema() -> Attribute {
    string_map(AttributeFlags::optional_computed())
        .with_force_new()
        .with_validator(Validator::Tags)
}

/// Tags that can be updated in place.
pub fn schema() -> Attribute {
    string_map(AttributeFlags::optional_computed()).with_validator(Validator::Tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::validation::validate;
    use serde_json::json;

    #[test]
    fn test_data_source_schema() {
        let attr = data_source_schema();
        assert_eq!(attr.attr_type, AttributeType::map(AttributeType::String));
        assert!(attr.flags.computed);
        assert!(!attr.flags.optional);
        assert!(!attr.flags.required);
        assert!(!attr.force_new);
        assert_eq!(attr.validator, None);
    }

    #[test]
    fn test_force_new_schema() {
        let attr = force_new_schema();
        assert_eq!(attr.attr_type, AttributeType::map(AttributeType::String));
        assert!(attr.flags.optional);
        assert!(attr.flags.computed);
        assert!(attr.force_new);
        assert_eq!(attr.validator, Some(Validator::Tags));
    }

    #[test]
    fn test_schema() {
        let attr = schema();
        assert_eq!(attr.attr_type, AttributeType::map(AttributeType::String));
        assert!(attr.flags.optional);
        assert!(attr.flags.computed);
        assert!(!attr.force_new);
        assert_eq!(attr.validator, Some(Validator::Tags));
    }

    #[test]
    fn test_helpers_return_fresh_values() {
        let mut a = schema();
        a.description = Some("changed".to_string());
        assert_eq!(schema().description, None);
    }

    #[test]
    fn test_tags_validated_through_schema() {
        let resource = Schema::v0().with_attribute(TAGS_ATTRIBUTE, schema());

        assert!(validate(&resource, &json!({"tags": {"env": "prod"}})).is_empty());
        assert!(validate(&resource, &json!({})).is_empty());

        let mut too_many = serde_json::Map::new();
        for i in 0..51 {
            too_many.insert(format!("k{}", i), json!("v"));
        }
        let diagnostics = validate(&resource, &json!({ "tags": too_many }));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("tags"));
    }
}
