//! Event type registry.
//!
//! Single source of truth for the event-type strings a subscription may
//! listen to, grouped into categories for configuration UIs. Lookup helpers
//! are total: unknown input yields `None`/`false`, never an error.

use serde::{Deserialize, Serialize};

/// A domain event type that can be delivered over webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookEventType {
    PetCreated,
    PetUpdated,
    PetDeleted,
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentCancelled,
    InventoryLowStock,
    InventoryTransferCompleted,
    SaleCompleted,
}

impl WebhookEventType {
    /// All event types in the catalog, in display order.
    pub fn all() -> &'static [WebhookEventType] {
        use WebhookEventType::*;
        &[
            PetCreated,
            PetUpdated,
            PetDeleted,
            AppointmentCreated,
            AppointmentUpdated,
            AppointmentCancelled,
            InventoryLowStock,
            InventoryTransferCompleted,
            SaleCompleted,
        ]
    }

    /// Parse an event-type string against the catalog.
    pub fn parse(s: &str) -> Option<Self> {
        use WebhookEventType::*;
        match s {
            "pet.created" => Some(PetCreated),
            "pet.updated" => Some(PetUpdated),
            "pet.deleted" => Some(PetDeleted),
            "appointment.created" => Some(AppointmentCreated),
            "appointment.updated" => Some(AppointmentUpdated),
            "appointment.cancelled" => Some(AppointmentCancelled),
            "inventory.low_stock" => Some(InventoryLowStock),
            "inventory.transfer_completed" => Some(InventoryTransferCompleted),
            "sale.completed" => Some(SaleCompleted),
            _ => None,
        }
    }

    /// The wire identifier, e.g. `pet.created`.
    pub fn as_str(&self) -> &'static str {
        use WebhookEventType::*;
        match self {
            PetCreated => "pet.created",
            PetUpdated => "pet.updated",
            PetDeleted => "pet.deleted",
            AppointmentCreated => "appointment.created",
            AppointmentUpdated => "appointment.updated",
            AppointmentCancelled => "appointment.cancelled",
            InventoryLowStock => "inventory.low_stock",
            InventoryTransferCompleted => "inventory.transfer_completed",
            SaleCompleted => "sale.completed",
        }
    }

    /// Human-readable category for configuration UIs.
    pub fn category(&self) -> &'static str {
        use WebhookEventType::*;
        match self {
            PetCreated | PetUpdated | PetDeleted => "Pets",
            AppointmentCreated | AppointmentUpdated | AppointmentCancelled => "Appointments",
            InventoryLowStock | InventoryTransferCompleted => "Inventory",
            SaleCompleted => "Sales",
        }
    }

    /// Short description for configuration UIs.
    pub fn description(&self) -> &'static str {
        use WebhookEventType::*;
        match self {
            PetCreated => "A patient record was created",
            PetUpdated => "A patient record was updated",
            PetDeleted => "A patient record was deleted",
            AppointmentCreated => "An appointment was booked",
            AppointmentUpdated => "An appointment was rescheduled or edited",
            AppointmentCancelled => "An appointment was cancelled",
            InventoryLowStock => "An inventory item fell below its reorder point",
            InventoryTransferCompleted => "A stock transfer between locations completed",
            SaleCompleted => "A point-of-sale transaction completed",
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership test against the fixed catalog.
pub fn is_valid_event_type(s: &str) -> bool {
    WebhookEventType::parse(s).is_some()
}

/// Display lookup: description for a known event type, `None` otherwise.
pub fn describe(event_type: &str) -> Option<&'static str> {
    WebhookEventType::parse(event_type).map(|et| et.description())
}

/// Display lookup: category for a known event type, `None` otherwise.
pub fn category_of(event_type: &str) -> Option<&'static str> {
    WebhookEventType::parse(event_type).map(|et| et.category())
}

/// Result of validating a caller-supplied event-type list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventListValidation {
    pub valid: bool,
    pub invalid: Vec<String>,
}

/// Partition an event-type list into valid/invalid entries.
///
/// Used when a tenant edits a subscription's event list: the whole edit is
/// rejected if any entry is invalid, surfacing every invalid entry.
pub fn validate_event_list(event_types: &[String]) -> EventListValidation {
    let invalid: Vec<String> = event_types
        .iter()
        .filter(|et| !is_valid_event_type(et))
        .cloned()
        .collect();

    EventListValidation {
        valid: invalid.is_empty(),
        invalid,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_for_all_variants() {
        for et in WebhookEventType::all() {
            assert_eq!(WebhookEventType::parse(et.as_str()), Some(*et));
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(WebhookEventType::parse("not.a.real.event"), None);
        assert_eq!(WebhookEventType::parse(""), None);
        // Case sensitive by design
        assert_eq!(WebhookEventType::parse("Pet.Created"), None);
    }

    #[test]
    fn test_is_valid_event_type() {
        assert!(is_valid_event_type("pet.created"));
        assert!(is_valid_event_type("sale.completed"));
        assert!(!is_valid_event_type("pet.groomed"));
    }

    #[test]
    fn test_display_helpers_are_total() {
        assert_eq!(category_of("appointment.cancelled"), Some("Appointments"));
        assert_eq!(category_of("nonsense"), None);
        assert!(describe("inventory.low_stock").is_some());
        assert_eq!(describe("nonsense"), None);
    }

    #[test]
    fn test_validate_event_list_partitions() {
        let list = vec![
            "pet.created".to_string(),
            "bogus.event".to_string(),
            "sale.completed".to_string(),
            "another.bogus".to_string(),
        ];
        let result = validate_event_list(&list);
        assert!(!result.valid);
        assert_eq!(result.invalid, vec!["bogus.event", "another.bogus"]);
    }

    #[test]
    fn test_validate_event_list_idempotent_on_valid_input() {
        let list: Vec<String> = WebhookEventType::all()
            .iter()
            .map(|et| et.as_str().to_string())
            .collect();
        let result = validate_event_list(&list);
        assert!(result.valid);
        assert!(result.invalid.is_empty());
    }

    #[test]
    fn test_validate_empty_list_is_valid() {
        let result = validate_event_list(&[]);
        assert!(result.valid);
        assert!(result.invalid.is_empty());
    }

    #[test]
    fn test_every_event_type_has_category_and_description() {
        for et in WebhookEventType::all() {
            assert!(!et.category().is_empty());
            assert!(!et.description().is_empty());
        }
    }
}
