//! Model change events
//!
//! Every mutation of a domain is recorded as a [`ModelEvent`] appended to the
//! active session. Events form a closed sum type discriminated by
//! [`ModelEvent::event_name`]; each kind carries enough payload to replay the
//! change or to synthesize its inverse, which is what makes rollback and
//! undo/redo possible.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value_objects::ElementId;

/// A single recorded change to a domain graph.
///
/// `correlation_id` is the id of the session that produced the event and is
/// used by dispatchers to suppress re-dispatch of echoed events. `top_level`
/// is true only for the event directly requested by the caller, never for
/// events emitted by a cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventName")]
pub enum ModelEvent {
    /// An entity node was created
    AddEntity {
        domain: String,
        id: ElementId,
        schema_id: ElementId,
        correlation_id: u64,
        version: u64,
        top_level: bool,
    },
    /// An entity node was removed
    RemoveEntity {
        domain: String,
        id: ElementId,
        schema_id: ElementId,
        correlation_id: u64,
        version: u64,
        top_level: bool,
    },
    /// A relationship node was created between two elements
    AddRelationship {
        domain: String,
        id: ElementId,
        schema_id: ElementId,
        start_id: ElementId,
        start_schema_id: ElementId,
        end_id: ElementId,
        end_schema_id: ElementId,
        correlation_id: u64,
        version: u64,
        top_level: bool,
    },
    /// A relationship node was removed
    RemoveRelationship {
        domain: String,
        id: ElementId,
        schema_id: ElementId,
        start_id: ElementId,
        start_schema_id: ElementId,
        end_id: ElementId,
        end_schema_id: ElementId,
        correlation_id: u64,
        version: u64,
        top_level: bool,
    },
    /// A property value was written. `value == None` encodes the removal of
    /// the property slot, which is how the inverse of a first write reads.
    ChangePropertyValue {
        domain: String,
        id: ElementId,
        schema_id: ElementId,
        property_name: String,
        value: Option<Value>,
        old_value: Option<Value>,
        correlation_id: u64,
        version: u64,
        top_level: bool,
    },
    /// A property slot was removed, usually by a cascade
    RemoveProperty {
        domain: String,
        id: ElementId,
        schema_id: ElementId,
        property_name: String,
        value: Option<Value>,
        correlation_id: u64,
        version: u64,
        top_level: bool,
    },
}

impl ModelEvent {
    /// String discriminator used by dispatchers
    pub fn event_name(&self) -> &'static str {
        match self {
            ModelEvent::AddEntity { .. } => "AddEntity",
            ModelEvent::RemoveEntity { .. } => "RemoveEntity",
            ModelEvent::AddRelationship { .. } => "AddRelationship",
            ModelEvent::RemoveRelationship { .. } => "RemoveRelationship",
            ModelEvent::ChangePropertyValue { .. } => "ChangePropertyValue",
            ModelEvent::RemoveProperty { .. } => "RemoveProperty",
        }
    }

    /// Name of the domain the event belongs to
    pub fn domain(&self) -> &str {
        match self {
            ModelEvent::AddEntity { domain, .. }
            | ModelEvent::RemoveEntity { domain, .. }
            | ModelEvent::AddRelationship { domain, .. }
            | ModelEvent::RemoveRelationship { domain, .. }
            | ModelEvent::ChangePropertyValue { domain, .. }
            | ModelEvent::RemoveProperty { domain, .. } => domain,
        }
    }

    /// Id of the affected element
    pub fn id(&self) -> &ElementId {
        match self {
            ModelEvent::AddEntity { id, .. }
            | ModelEvent::RemoveEntity { id, .. }
            | ModelEvent::AddRelationship { id, .. }
            | ModelEvent::RemoveRelationship { id, .. }
            | ModelEvent::ChangePropertyValue { id, .. }
            | ModelEvent::RemoveProperty { id, .. } => id,
        }
    }

    /// Schema id of the affected element
    pub fn schema_id(&self) -> &ElementId {
        match self {
            ModelEvent::AddEntity { schema_id, .. }
            | ModelEvent::RemoveEntity { schema_id, .. }
            | ModelEvent::AddRelationship { schema_id, .. }
            | ModelEvent::RemoveRelationship { schema_id, .. }
            | ModelEvent::ChangePropertyValue { schema_id, .. }
            | ModelEvent::RemoveProperty { schema_id, .. } => schema_id,
        }
    }

    /// Id of the session that produced the event
    pub fn correlation_id(&self) -> u64 {
        match self {
            ModelEvent::AddEntity { correlation_id, .. }
            | ModelEvent::RemoveEntity { correlation_id, .. }
            | ModelEvent::AddRelationship { correlation_id, .. }
            | ModelEvent::RemoveRelationship { correlation_id, .. }
            | ModelEvent::ChangePropertyValue { correlation_id, .. }
            | ModelEvent::RemoveProperty { correlation_id, .. } => *correlation_id,
        }
    }

    /// Version stamp of the change
    pub fn version(&self) -> u64 {
        match self {
            ModelEvent::AddEntity { version, .. }
            | ModelEvent::RemoveEntity { version, .. }
            | ModelEvent::AddRelationship { version, .. }
            | ModelEvent::RemoveRelationship { version, .. }
            | ModelEvent::ChangePropertyValue { version, .. }
            | ModelEvent::RemoveProperty { version, .. } => *version,
        }
    }

    /// True when the event was directly requested by the caller rather than
    /// emitted by a cascade
    pub fn is_top_level(&self) -> bool {
        match self {
            ModelEvent::AddEntity { top_level, .. }
            | ModelEvent::RemoveEntity { top_level, .. }
            | ModelEvent::AddRelationship { top_level, .. }
            | ModelEvent::RemoveRelationship { top_level, .. }
            | ModelEvent::ChangePropertyValue { top_level, .. }
            | ModelEvent::RemoveProperty { top_level, .. } => *top_level,
        }
    }

    /// Build the event that restores the pre-state of the affected node.
    ///
    /// Applying an event and then its reverse leaves the graph unchanged.
    /// The reverse is stamped with the session that replays it.
    pub fn reverse(&self, correlation_id: u64) -> Option<ModelEvent> {
        let rev = match self.clone() {
            ModelEvent::AddEntity { domain, id, schema_id, version, top_level, .. } => {
                ModelEvent::RemoveEntity { domain, id, schema_id, correlation_id, version, top_level }
            }
            ModelEvent::RemoveEntity { domain, id, schema_id, version, top_level, .. } => {
                ModelEvent::AddEntity { domain, id, schema_id, correlation_id, version, top_level }
            }
            ModelEvent::AddRelationship {
                domain,
                id,
                schema_id,
                start_id,
                start_schema_id,
                end_id,
                end_schema_id,
                version,
                top_level,
                ..
            } => ModelEvent::RemoveRelationship {
                domain,
                id,
                schema_id,
                start_id,
                start_schema_id,
                end_id,
                end_schema_id,
                correlation_id,
                version,
                top_level,
            },
            ModelEvent::RemoveRelationship {
                domain,
                id,
                schema_id,
                start_id,
                start_schema_id,
                end_id,
                end_schema_id,
                version,
                top_level,
                ..
            } => ModelEvent::AddRelationship {
                domain,
                id,
                schema_id,
                start_id,
                start_schema_id,
                end_id,
                end_schema_id,
                correlation_id,
                version,
                top_level,
            },
            ModelEvent::ChangePropertyValue {
                domain,
                id,
                schema_id,
                property_name,
                value,
                old_value,
                version,
                top_level,
                ..
            } => ModelEvent::ChangePropertyValue {
                domain,
                id,
                schema_id,
                property_name,
                value: old_value,
                old_value: value,
                correlation_id,
                version,
                top_level,
            },
            ModelEvent::RemoveProperty {
                domain,
                id,
                schema_id,
                property_name,
                value,
                version,
                top_level,
                ..
            } => ModelEvent::ChangePropertyValue {
                domain,
                id,
                schema_id,
                property_name,
                value,
                old_value: None,
                correlation_id,
                version,
                top_level,
            },
        };
        Some(rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(value: Option<Value>, old: Option<Value>) -> ModelEvent {
        ModelEvent::ChangePropertyValue {
            domain: "d".into(),
            id: ElementId::new("d", "1"),
            schema_id: ElementId::new("lib", "Book"),
            property_name: "Title".into(),
            value,
            old_value: old,
            correlation_id: 1,
            version: 10,
            top_level: true,
        }
    }

    #[test]
    fn add_entity_reverses_to_remove() {
        let ev = ModelEvent::AddEntity {
            domain: "d".into(),
            id: ElementId::new("d", "1"),
            schema_id: ElementId::new("lib", "Book"),
            correlation_id: 1,
            version: 5,
            top_level: true,
        };
        match ev.reverse(2) {
            Some(ModelEvent::RemoveEntity { id, correlation_id, version, .. }) => {
                assert_eq!(id, ElementId::new("d", "1"));
                assert_eq!(correlation_id, 2);
                assert_eq!(version, 5);
            }
            other => panic!("unexpected reverse: {other:?}"),
        }
    }

    #[test]
    fn change_property_reverse_swaps_values() {
        let ev = change(Some(json!("new")), Some(json!("old")));
        match ev.reverse(9) {
            Some(ModelEvent::ChangePropertyValue { value, old_value, .. }) => {
                assert_eq!(value, Some(json!("old")));
                assert_eq!(old_value, Some(json!("new")));
            }
            other => panic!("unexpected reverse: {other:?}"),
        }
    }

    #[test]
    fn first_write_reverse_clears_the_slot() {
        let ev = change(Some(json!("x")), None);
        match ev.reverse(9) {
            Some(ModelEvent::ChangePropertyValue { value, old_value, .. }) => {
                assert_eq!(value, None);
                assert_eq!(old_value, Some(json!("x")));
            }
            other => panic!("unexpected reverse: {other:?}"),
        }
    }

    #[test]
    fn remove_property_reverses_to_restore() {
        let ev = ModelEvent::RemoveProperty {
            domain: "d".into(),
            id: ElementId::new("d", "1"),
            schema_id: ElementId::new("lib", "Book"),
            property_name: "Title".into(),
            value: Some(json!("kept")),
            correlation_id: 1,
            version: 3,
            top_level: false,
        };
        match ev.reverse(2) {
            Some(ModelEvent::ChangePropertyValue { value, old_value, .. }) => {
                assert_eq!(value, Some(json!("kept")));
                assert_eq!(old_value, None);
            }
            other => panic!("unexpected reverse: {other:?}"),
        }
    }

    #[test]
    fn event_name_round_trips_through_serde() {
        let ev = change(Some(json!(1)), None);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["eventName"], "ChangePropertyValue");
        let back: ModelEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }
}
