use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Trait for reply types whose JSON schema is sent to the model as a hint.
///
/// Automatically implemented for any type that implements `JsonSchema + DeserializeOwned`.
/// Field doc comments become `description`s, so the hint tells the model what
/// each key means, not just its type.
pub trait SchemaHint: JsonSchema + DeserializeOwned {
    /// Generate the schema hint for this type.
    ///
    /// 1. `additionalProperties: false` on record objects (maps keep their value schema)
    /// 2. ALL record properties listed in `required`, even nullable ones
    /// 3. Fully inlined schemas (no `$ref` references)
    fn schema_hint() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        fix_object_schemas(&mut value);
        inline_refs(&mut value);

        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }

        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> SchemaHint for T {}

fn fix_object_schemas(value: &mut serde_json::Value) {
    if let serde_json::Value::Object(map) = value {
        if let Some(serde_json::Value::Object(props)) = map.get("properties") {
            let all_keys: Vec<serde_json::Value> = props
                .keys()
                .map(|k| serde_json::Value::String(k.clone()))
                .collect();
            map.insert("required".to_string(), serde_json::Value::Array(all_keys));
            map.insert(
                "additionalProperties".to_string(),
                serde_json::Value::Bool(false),
            );
        }

        for (_, v) in map.iter_mut() {
            fix_object_schemas(v);
        }
    } else if let serde_json::Value::Array(arr) = value {
        for item in arr.iter_mut() {
            fix_object_schemas(item);
        }
    }
}

fn inline_refs(value: &mut serde_json::Value) {
    let definitions = if let serde_json::Value::Object(map) = value {
        map.get("definitions").cloned()
    } else {
        None
    };

    if let Some(defs) = definitions {
        inline_refs_recursive(value, &defs);
    }
}

fn inline_refs_recursive(value: &mut serde_json::Value, definitions: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(ref_path)) = map.get("$ref").cloned() {
                if ref_path.starts_with("#/definitions/") {
                    let type_name = ref_path.trim_start_matches("#/definitions/");
                    if let Some(def) = definitions.get(type_name) {
                        *value = def.clone();
                        inline_refs_recursive(value, definitions);
                        return;
                    }
                }
            }

            if let Some(serde_json::Value::Array(mut all_of)) = map.get("allOf").cloned() {
                if let (1, Some(only)) = (all_of.len(), all_of.pop()) {
                    *value = only;
                    inline_refs_recursive(value, definitions);
                    return;
                }
            }

            for (_, v) in map.iter_mut() {
                inline_refs_recursive(v, definitions);
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                inline_refs_recursive(item, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Deserialize, JsonSchema)]
    struct Reply {
        /// One-line neutral summary.
        summary: String,
        #[schemars(range(min = 0.0, max = 1.0))]
        friendly_score: Option<f64>,
        topic_coverage: BTreeMap<String, f64>,
    }

    #[test]
    fn hint_is_object_without_definitions() {
        let schema = Reply::schema_hint();
        let obj = schema.as_object().unwrap();
        assert!(!obj.contains_key("definitions"));
        assert!(!obj.contains_key("$schema"));
    }

    #[test]
    fn all_record_properties_required() {
        let schema = Reply::schema_hint();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"summary"));
        assert!(required.contains(&"friendly_score"));
        assert!(required.contains(&"topic_coverage"));
        assert_eq!(schema["additionalProperties"], serde_json::Value::Bool(false));
    }

    #[test]
    fn map_fields_keep_value_schema() {
        let schema = Reply::schema_hint();
        let coverage = &schema["properties"]["topic_coverage"];
        assert!(coverage["additionalProperties"].is_object());
    }

    #[test]
    fn doc_comments_become_descriptions() {
        let schema = Reply::schema_hint();
        assert_eq!(
            schema["properties"]["summary"]["description"],
            "One-line neutral summary."
        );
    }

    #[test]
    fn nested_struct_inlined() {
        #[derive(Deserialize, JsonSchema)]
        struct Inner {
            id: i64,
        }

        #[derive(Deserialize, JsonSchema)]
        struct Outer {
            inner: Inner,
        }

        let schema = Outer::schema_hint();
        let inner = &schema["properties"]["inner"];
        assert!(inner.get("$ref").is_none());
        assert_eq!(inner["type"], "object");
        assert_eq!(inner["additionalProperties"], serde_json::Value::Bool(false));
    }
}
