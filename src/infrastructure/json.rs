//! JSON translation
//!
//! Bidirectional translator between JSON documents and graph mutations. Two
//! input forms are accepted: the compressed envelope
//! (`{schemas, entities, relationships}`, with numeric schema indices and
//! `state: "D"` removals) and a plain object tree with `$id`/`$ref`
//! back-references. Loading runs inside a session in loading mode, so the
//! changes never reach undo recording. Element serialization emits the
//! object form, inserting `$id`/`$ref` where the neighborhood is shared or
//! cyclic.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::domain::{Domain, ModelElement};
use crate::errors::{HyperstoreError, Result};
use crate::session::{SessionConfig, SessionMode};
use crate::value_objects::ElementId;

/// Load a JSON document into the domain, returning the loaded root elements
pub(crate) fn load(domain: &Domain, value: &Value) -> Result<Vec<ModelElement>> {
    let store = domain.inner.store()?;
    store.run_in_session(SessionConfig::with_mode(SessionMode::LOADING), || {
        let loaded = if value.get("entities").is_some() || value.get("relationships").is_some() {
            load_envelope(domain, value)?
        } else {
            let mut refs = HashMap::new();
            vec![load_object(domain, value, None, &mut refs)?]
        };
        info!(domain = %domain.name(), elements = loaded.len(), "json document loaded");
        Ok(loaded)
    })
}

/// Dump every live element of the domain into the envelope form
pub(crate) fn export(domain: &Domain) -> Result<Value> {
    let mut entities = Vec::new();
    let mut relationships = Vec::new();
    let graph = domain.inner.graph.borrow();
    for i in 0..graph.slot_count() {
        let node = match graph.slot_at(i) {
            Some(n) => n,
            None => continue,
        };
        let properties: Vec<Value> = graph
            .properties_of(&node.id)
            .into_iter()
            .filter_map(|(name, slot)| slot.value.map(|v| json!({ "name": name, "value": v })))
            .collect();
        let mut entry = Map::new();
        entry.insert("id".into(), node.id.to_string().into());
        entry.insert("schema".into(), node.schema_id.to_string().into());
        entry.insert("v".into(), node.version.into());
        if !properties.is_empty() {
            entry.insert("properties".into(), Value::Array(properties));
        }
        if node.is_edge() {
            if let (Some(start), Some(end), Some(end_schema)) =
                (&node.start_id, &node.end_id, &node.end_schema_id)
            {
                entry.insert("startId".into(), start.to_string().into());
                entry.insert("endId".into(), end.to_string().into());
                entry.insert("endSchemaId".into(), end_schema.to_string().into());
            }
            relationships.push(Value::Object(entry));
        } else {
            entities.push(Value::Object(entry));
        }
    }
    Ok(json!({ "entities": entities, "relationships": relationships }))
}

fn load_envelope(domain: &Domain, value: &Value) -> Result<Vec<ModelElement>> {
    let schema_table = schema_table(value.get("schemas"));
    let mut loaded = Vec::new();

    if let Some(entities) = value.get("entities").and_then(Value::as_array) {
        for entry in entities {
            let id = entry
                .get("id")
                .and_then(entry_id)
                .ok_or_else(|| HyperstoreError::InvalidFormat("entity without id".into()))?;
            let version = entry.get("v").and_then(Value::as_u64);
            let element_id = qualify(domain, &id);

            if entry.get("state").and_then(Value::as_str) == Some("D") {
                if domain.element_exists(&element_id) {
                    domain.remove_with(&element_id, version)?;
                }
                continue;
            }

            let schema = schema_token(entry.get("schema"), &schema_table)?;
            let element = match domain.get(&element_id) {
                Some(existing) => existing,
                None => domain.create_entity_with(&schema, Some(element_id.local()), version)?,
            };
            apply_properties(domain, &element, entry.get("properties"), version)?;
            loaded.push(element);
        }
    }

    if let Some(relationships) = value.get("relationships").and_then(Value::as_array) {
        for entry in relationships {
            let id = entry
                .get("id")
                .and_then(entry_id)
                .ok_or_else(|| HyperstoreError::InvalidFormat("relationship without id".into()))?;
            let version = entry.get("v").and_then(Value::as_u64);
            let element_id = qualify(domain, &id);

            if entry.get("state").and_then(Value::as_str) == Some("D") {
                if domain.element_exists(&element_id) {
                    domain.remove_with(&element_id, version)?;
                }
                continue;
            }

            let schema = schema_token(entry.get("schema"), &schema_table)?;
            let start = entry.get("startId").and_then(entry_id).ok_or_else(|| {
                HyperstoreError::InvalidFormat(format!("relationship {id} without startId"))
            })?;
            let end = entry.get("endId").and_then(entry_id).ok_or_else(|| {
                HyperstoreError::InvalidFormat(format!("relationship {id} without endId"))
            })?;
            let end_schema = entry
                .get("endSchemaId")
                .and_then(Value::as_str)
                .map(|s| s.parse::<ElementId>().ok())
                .flatten();

            let element = match domain.get(&element_id) {
                Some(existing) => existing,
                None => domain.inner.create_relationship(
                    &schema,
                    &qualify(domain, &start),
                    &qualify(domain, &end),
                    end_schema.as_ref(),
                    Some(element_id.local()),
                    version,
                )?,
            };
            apply_properties(domain, &element, entry.get("properties"), version)?;
            loaded.push(element);
        }
    }
    Ok(loaded)
}

/// Flatten `schemas: [{name?, elements: [{name}]}]` into the index table
/// numeric schema tokens point into
fn schema_table(schemas: Option<&Value>) -> Vec<String> {
    let mut table = Vec::new();
    let groups = match schemas.and_then(Value::as_array) {
        Some(g) => g,
        None => return table,
    };
    for group in groups {
        let group_name = group.get("name").and_then(Value::as_str);
        if let Some(elements) = group.get("elements").and_then(Value::as_array) {
            for element in elements {
                if let Some(name) = element.get("name").and_then(Value::as_str) {
                    match group_name {
                        Some(g) => table.push(format!("{g}:{name}")),
                        None => table.push(name.to_string()),
                    }
                }
            }
        }
    }
    table
}

fn schema_token(token: Option<&Value>, table: &[String]) -> Result<String> {
    match token {
        Some(Value::Number(n)) => {
            let idx = n.as_u64().unwrap_or(u64::MAX) as usize;
            table.get(idx).cloned().ok_or_else(|| {
                HyperstoreError::InvalidFormat(format!("schema index {idx} out of range"))
            })
        }
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(HyperstoreError::InvalidFormat("missing schema token".into())),
    }
}

/// Envelope ids may be numbers or strings, full or local
fn entry_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Qualify a token against the loading domain; full ids pass through
fn qualify(domain: &Domain, token: &str) -> ElementId {
    if token.contains(':') {
        token.parse().unwrap_or_else(|_| ElementId::new(domain.name(), token))
    } else {
        ElementId::new(domain.name(), token)
    }
}

fn apply_properties(
    domain: &Domain,
    element: &ModelElement,
    properties: Option<&Value>,
    version: Option<u64>,
) -> Result<()> {
    let entries = match properties.and_then(Value::as_array) {
        Some(p) => p,
        None => return Ok(()),
    };
    let schema = element.schema()?;
    for entry in entries {
        let name = match entry.get("name").and_then(Value::as_str) {
            Some(n) => n,
            None => continue,
        };
        let value = entry.get("value").cloned().unwrap_or(Value::Null);
        match schema.property(name, true) {
            Some(prop) => {
                domain.set_property_value_with(
                    element.id(),
                    name,
                    prop.deserialize(&value),
                    version,
                )?;
            }
            None => warn!(property = name, schema = %schema.id(), "unknown property skipped"),
        }
    }
    Ok(())
}

/// Load one object of the `$id`/`$ref` form; nested objects and arrays keyed
/// by reference names become relationships
fn load_object(
    domain: &Domain,
    value: &Value,
    expected_schema: Option<ElementId>,
    refs: &mut HashMap<String, ModelElement>,
) -> Result<ModelElement> {
    let obj = value
        .as_object()
        .ok_or_else(|| HyperstoreError::InvalidFormat("expected a JSON object".into()))?;

    if let Some(key) = obj.get("$ref").and_then(Value::as_str) {
        return refs
            .get(key)
            .cloned()
            .ok_or_else(|| HyperstoreError::InvalidFormat(format!("unresolved $ref '{key}'")));
    }

    let schema_name = obj
        .get("$schema")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| expected_schema.map(|id| id.to_string()))
        .ok_or_else(|| HyperstoreError::InvalidFormat("object without $schema".into()))?;

    let element = domain.create_entity(&schema_name)?;
    if let Some(key) = obj.get("$id").and_then(Value::as_str) {
        refs.insert(key.to_string(), element.clone());
    }

    let schema = element.schema()?;
    let store = domain.inner.store()?;
    for (key, entry) in obj {
        if key.starts_with('$') {
            continue;
        }
        if let Some(prop) = schema.property(key, true) {
            if prop.is_calculated() {
                continue;
            }
            domain.set_property_value(element.id(), key, prop.deserialize(entry))?;
            continue;
        }
        if let Some(reference) = schema.reference(key, true) {
            if entry.is_array() && !reference.is_collection {
                return Err(HyperstoreError::TypeMismatch(format!(
                    "array assigned to non-collection reference '{key}'"
                )));
            }
            let def = {
                let schemas = store.schemas.borrow();
                schemas
                    .get_schema_relationship(reference.relationship.as_str())?
                    .relationship()
                    .cloned()
                    .ok_or_else(|| {
                        HyperstoreError::TypeMismatch(format!(
                            "'{}' has no relationship definition",
                            reference.relationship
                        ))
                    })?
            };
            let child_schema =
                if reference.opposite { def.start_schema.clone() } else { def.end_schema.clone() };
            let children: Vec<&Value> = match entry.as_array() {
                Some(arr) => arr.iter().collect(),
                None => vec![entry],
            };
            for child_value in children {
                let child = load_object(domain, child_value, Some(child_schema.clone()), refs)?;
                if reference.opposite {
                    domain.create_relationship(
                        reference.relationship.as_str(),
                        child.id(),
                        element.id(),
                    )?;
                } else {
                    domain.create_relationship(
                        reference.relationship.as_str(),
                        element.id(),
                        child.id(),
                    )?;
                }
            }
            continue;
        }
        warn!(key, "unknown key in object document skipped");
    }
    Ok(element)
}

/// Serialize an element and its reachable neighborhood to the object form
pub(crate) fn stringify(element: &ModelElement) -> Result<Value> {
    let mut counts = HashMap::new();
    scan(element, &mut counts)?;
    let shared: HashSet<ElementId> =
        counts.into_iter().filter(|(_, c)| *c > 1).map(|(id, _)| id).collect();
    let mut written = HashSet::new();
    emit(element, &shared, &mut written)
}

/// Count how often each element is reached through forward references, so
/// shared and cyclic targets get a `$id` tag
fn scan(element: &ModelElement, counts: &mut HashMap<ElementId, usize>) -> Result<()> {
    let seen = counts.entry(element.id().clone()).or_insert(0);
    *seen += 1;
    if *seen > 1 {
        return Ok(());
    }
    let schema = element.schema()?;
    for reference in schema.references(true).iter().filter(|r| !r.opposite) {
        for child in element.related(&reference.name)? {
            scan(&child, counts)?;
        }
    }
    Ok(())
}

fn emit(
    element: &ModelElement,
    shared: &HashSet<ElementId>,
    written: &mut HashSet<ElementId>,
) -> Result<Value> {
    if written.contains(element.id()) {
        return Ok(json!({ "$ref": element.id().to_string() }));
    }
    written.insert(element.id().clone());

    let mut obj = Map::new();
    if shared.contains(element.id()) {
        obj.insert("$id".into(), element.id().to_string().into());
    }
    obj.insert("$schema".into(), element.schema_id().to_string().into());

    let schema = element.schema()?;
    let domain = element.domain()?;
    for prop in schema.properties(true) {
        if prop.is_calculated() {
            continue;
        }
        // only stored slots; absent properties keep materializing defaults
        let stored = {
            let graph = domain.inner.graph.borrow();
            graph.property_node(element.id(), prop.name()).and_then(|slot| slot.value.clone())
        };
        if let Some(value) = stored {
            obj.insert(prop.name().to_string(), prop.serialize(&value));
        }
    }

    for reference in schema.references(true).iter().filter(|r| !r.opposite) {
        let children = element.related(&reference.name)?;
        if reference.is_collection {
            if children.is_empty() {
                continue;
            }
            let rendered = children
                .iter()
                .map(|c| emit(c, shared, written))
                .collect::<Result<Vec<_>>>()?;
            obj.insert(reference.name.clone(), Value::Array(rendered));
        } else if let Some(child) = children.first() {
            obj.insert(reference.name.clone(), emit(child, shared, written)?);
        }
    }
    Ok(Value::Object(obj))
}
