//! Backend schema rendering and drift detection

use crate::search::fields::{DataType, FieldCatalog, FieldDefinition, Namespace, FULL_SUFFIX};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Index mapping the catalog implies for `doctype`
pub fn render_mapping(catalog: &FieldCatalog, doctype: &str) -> Value {
    let mut namespaces = Map::new();

    for namespace in [Namespace::ProcessedCrash, Namespace::RawCrash] {
        let properties: Map<String, Value> = catalog
            .fields()
            .iter()
            .filter(|f| f.namespace == namespace)
            .map(|f| (f.storage_name.clone(), field_mapping(f)))
            .collect();

        namespaces.insert(
            namespace.to_string(),
            json!({ "type": "object", "dynamic": true, "properties": properties }),
        );
    }

    json!({ doctype: { "_all": { "enabled": false }, "properties": namespaces } })
}

fn field_mapping(field: &FieldDefinition) -> Value {
    let base = match field.data_type {
        DataType::String | DataType::Enum => json!({ "type": "string" }),
        DataType::Integer => json!({ "type": "long" }),
        DataType::Boolean => json!({ "type": "boolean" }),
        DataType::Date => json!({ "type": "date", "format": "yyyy-MM-dd" }),
        DataType::Datetime => json!({ "type": "date", "format": "dateOptionalTime" }),
    };

    if !field.has_full_version {
        return base;
    }

    json!({
        "type": "multi_field",
        "fields": {
            field.storage_name.as_str(): base,
            FULL_SUFFIX: { "type": "string", "index": "not_analyzed" },
        }
    })
}

/// Dotted paths of every leaf property in a `GET _mapping` response.
///
/// Accepts both `{index: {doctype: {properties}}}` and
/// `{index: {mappings: {doctype: {properties}}}}` layouts.
pub fn mapped_paths(response: &Value) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();

    let Some(indices) = response.as_object() else {
        return paths;
    };
    for index in indices.values() {
        let types = index.get("mappings").unwrap_or(index);
        let Some(types) = types.as_object() else {
            continue;
        };
        for doctype in types.values() {
            if let Some(properties) = doctype["properties"].as_object() {
                collect_paths(properties, None, &mut paths);
            }
        }
    }
    paths
}

fn collect_paths(properties: &Map<String, Value>, prefix: Option<&str>, out: &mut BTreeSet<String>) {
    for (name, spec) in properties {
        let path = match prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.clone(),
        };
        match spec["properties"].as_object() {
            Some(children) => collect_paths(children, Some(&path), out),
            None => {
                out.insert(path);
            }
        }
    }
}

/// Storage paths mapped in the backend but unknown to the catalog, sorted
pub fn missing_fields(response: &Value, catalog: &FieldCatalog) -> Vec<String> {
    let known = catalog.storage_paths();
    mapped_paths(response)
        .into_iter()
        .filter(|path| !known.contains(path))
        .collect()
}
