use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::session::{SlotFieldType, SlotValue};

stored_object!(SlotSchema, "slot_schema", {
    name: String,
    field_type: SlotFieldType,
    enum_values: Option<Vec<String>>,
    required: bool
});

impl SlotSchema {
    /// Total function from `(schema, raw value)` to either the accepted value
    /// or a message explaining why it was rejected: wrong variant for the
    /// slot's declared type, or an enum value outside `enum_values`.
    pub fn validate(&self, raw: &SlotValue) -> Result<SlotValue, String> {
        match (&self.field_type, raw) {
            (SlotFieldType::String, SlotValue::String(_))
            | (SlotFieldType::Int, SlotValue::Int(_))
            | (SlotFieldType::Float, SlotValue::Float(_))
            | (SlotFieldType::Date, SlotValue::Date(_)) => Ok(raw.clone()),
            (SlotFieldType::Enum, SlotValue::Enum(value)) => match &self.enum_values {
                Some(allowed) if allowed.iter().any(|v| v == value) => Ok(raw.clone()),
                Some(allowed) => Err(format!(
                    "'{value}' is not one of the allowed values ({})",
                    allowed.join(", ")
                )),
                None => Ok(raw.clone()),
            },
            _ => Err(format!(
                "expected a {:?} value, got {}",
                self.field_type,
                raw.type_name()
            )),
        }
    }

    pub async fn catalog(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let schemas: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) ORDER BY name")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;
        Ok(schemas)
    }

    /// The fixed slot catalog this service ships with. Seeded on first
    /// startup (`ensure_initialized`) and editable afterwards.
    pub fn defaults() -> Vec<(String, SlotFieldType, Option<Vec<String>>, bool)> {
        vec![
            (
                "destination_country".to_string(),
                SlotFieldType::Enum,
                Some(vec![
                    "US".to_string(),
                    "UK".to_string(),
                    "CA".to_string(),
                    "AU".to_string(),
                    "JP".to_string(),
                    "KR".to_string(),
                    "DE".to_string(),
                ]),
                false,
            ),
            (
                "intended_intake".to_string(),
                SlotFieldType::Date,
                None,
                false,
            ),
            (
                "budget_tier".to_string(),
                SlotFieldType::Enum,
                Some(vec![
                    "low".to_string(),
                    "medium".to_string(),
                    "high".to_string(),
                ]),
                false,
            ),
            (
                "target_degree_level".to_string(),
                SlotFieldType::Enum,
                Some(vec![
                    "undergraduate".to_string(),
                    "graduate".to_string(),
                    "doctorate".to_string(),
                ]),
                false,
            ),
        ]
    }
}

/// Validates every `(name, value)` pair against the catalog. A name absent
/// from the catalog, or a value `SlotSchema::validate` rejects, is dropped
/// from the accepted map and reported in `slot_errors` as `"name: reason"`.
/// The caller merges only the accepted map, so a rejected value leaves
/// whatever the slot previously held untouched.
pub fn validate_slots(
    catalog: &[SlotSchema],
    raw: BTreeMap<String, SlotValue>,
) -> (BTreeMap<String, SlotValue>, Vec<String>) {
    let mut accepted = BTreeMap::new();
    let mut errors = Vec::new();

    for (name, value) in raw {
        match catalog.iter().find(|schema| schema.name == name) {
            Some(schema) => match schema.validate(&value) {
                Ok(validated) => {
                    accepted.insert(name, validated);
                }
                Err(message) => errors.push(format!("{name}: {message}")),
            },
            None => errors.push(format!("{name}: unknown slot")),
        }
    }

    (accepted, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catalog_returns_seeded_schemas_in_name_order() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .unwrap();
        db.ensure_initialized().await.unwrap();

        for (name, field_type, enum_values, required) in SlotSchema::defaults() {
            let now = chrono::Utc::now();
            db.store_item(SlotSchema {
                id: name.clone(),
                created_at: now,
                updated_at: now,
                name,
                field_type,
                enum_values,
                required,
            })
            .await
            .unwrap();
        }

        let catalog = SlotSchema::catalog(&db).await.unwrap();
        assert_eq!(catalog.len(), 4);
        assert!(catalog.windows(2).all(|w| w[0].name <= w[1].name));
    }

    fn enum_schema() -> SlotSchema {
        let now = chrono::Utc::now();
        SlotSchema {
            id: "budget_tier".into(),
            created_at: now,
            updated_at: now,
            name: "budget_tier".into(),
            field_type: SlotFieldType::Enum,
            enum_values: Some(vec!["low".into(), "medium".into(), "high".into()]),
            required: false,
        }
    }

    #[test]
    fn validate_accepts_a_value_matching_the_declared_type() {
        let schema = enum_schema();
        let result = schema.validate(&SlotValue::Enum("medium".into()));
        assert_eq!(result, Ok(SlotValue::Enum("medium".into())));
    }

    #[test]
    fn validate_rejects_an_enum_value_outside_the_catalog() {
        let schema = enum_schema();
        let result = schema.validate(&SlotValue::Enum("astronomical".into()));
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_a_mismatched_type() {
        let schema = enum_schema();
        let result = schema.validate(&SlotValue::Int(3));
        assert!(result.is_err());
    }

    #[test]
    fn validate_slots_drops_unknown_names_into_errors() {
        let catalog = vec![enum_schema()];
        let mut raw = BTreeMap::new();
        raw.insert("destination_country".into(), SlotValue::String("JP".into()));

        let (accepted, errors) = validate_slots(&catalog, raw);
        assert!(accepted.is_empty());
        assert_eq!(errors, vec!["destination_country: unknown slot".to_string()]);
    }

    #[test]
    fn validate_slots_partitions_valid_and_invalid_values() {
        let catalog = vec![enum_schema()];
        let mut raw = BTreeMap::new();
        raw.insert("budget_tier".into(), SlotValue::Enum("high".into()));
        raw.insert("budget_tier_typo".into(), SlotValue::Enum("high".into()));

        let (accepted, errors) = validate_slots(&catalog, raw);
        assert_eq!(accepted.get("budget_tier"), Some(&SlotValue::Enum("high".into())));
        assert_eq!(errors.len(), 1);
    }
}
