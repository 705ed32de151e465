//! Event type vocabulary.
//!
//! The set of event types endpoints may subscribe to is configuration, owned
//! by the business modules that raise events. The engine only checks names
//! against it.

use std::collections::BTreeSet;

use crate::{
    error::{CoreError, Result},
    models::EventType,
};

/// Event types a hospital-operations deployment raises out of the box.
pub const DEFAULT_EVENT_TYPES: &[&str] = &[
    "appointment.cancelled",
    "appointment.scheduled",
    "billing.created",
    "billing.paid",
    "billing.refunded",
    "inventory.low_stock",
    "lab.result_ready",
    "patient.admitted",
    "patient.discharged",
    "prescription.created",
    "prescription.dispensed",
    "triage.completed",
];

/// Closed set of subscribable event types.
///
/// Never contains the reserved `webhook.test` type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCatalog {
    types: BTreeSet<EventType>,
}

impl EventCatalog {
    /// Builds a catalog from event type names.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` if a name is malformed, reserved, or
    /// the set is empty.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut types = BTreeSet::new();
        for name in names {
            let event_type = EventType::parse(name.as_ref())?;
            if event_type.is_reserved() {
                return Err(CoreError::validation(
                    "eventTypes",
                    format!("`{event_type}` is reserved and cannot be configured"),
                ));
            }
            types.insert(event_type);
        }
        if types.is_empty() {
            return Err(CoreError::validation("eventTypes", "catalog must not be empty"));
        }
        Ok(Self { types })
    }

    /// Whether `event_type` is subscribable.
    pub fn contains(&self, event_type: &EventType) -> bool {
        self.types.contains(event_type)
    }

    /// Parses `name` and checks it is a subscribable type.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Validation` on `eventType` for malformed, unknown
    /// or reserved names.
    pub fn resolve(&self, name: &str) -> Result<EventType> {
        let event_type = EventType::parse(name)?;
        if event_type.is_reserved() {
            return Err(CoreError::validation(
                "eventType",
                format!("`{event_type}` is reserved for test deliveries"),
            ));
        }
        if !self.contains(&event_type) {
            return Err(CoreError::validation(
                "eventType",
                format!("`{event_type}` is not a known event type"),
            ));
        }
        Ok(event_type)
    }

    /// Iterates the catalog in name order.
    pub fn iter(&self) -> impl Iterator<Item = &EventType> {
        self.types.iter()
    }

    /// Number of subscribable types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Always false for a constructed catalog.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        let types = DEFAULT_EVENT_TYPES
            .iter()
            .map(|name| EventType::from_stored((*name).to_string()))
            .collect();
        Self { types }
    }
}
