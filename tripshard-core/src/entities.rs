//! Aggregate entity structures
//!
//! A travel plan and its locations form one aggregate. Every location is
//! stored on the same shard as its plan.

use crate::{LocationId, PlanId, Timestamp, Version};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default currency for new plans.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Kind of aggregate member, used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Plan,
    Location,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Plan => "plan",
            EntityType::Location => "location",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityType::Plan => "Travel plan",
            EntityType::Location => "Location",
        })
    }
}

/// Travel plan - root of the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub budget: Option<Decimal>,
    pub currency: String,
    pub is_public: bool,
    /// Incremented by exactly one on every accepted write to the aggregate.
    pub version: Version,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Plan {
    /// Build a fresh plan at version 1.
    pub fn new(id: PlanId, fields: PlanFields, now: Timestamp) -> Self {
        Self {
            id,
            title: fields.title,
            description: fields.description,
            start_date: fields.start_date,
            end_date: fields.end_date,
            budget: fields.budget,
            currency: fields.currency,
            is_public: fields.is_public,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the user-editable fields, leaving identity and version alone.
    pub fn apply_fields(&mut self, fields: &PlanFields) {
        self.title = fields.title.clone();
        self.description = fields.description.clone();
        self.start_date = fields.start_date;
        self.end_date = fields.end_date;
        self.budget = fields.budget;
        self.currency = fields.currency.clone();
        self.is_public = fields.is_public;
    }
}

/// A stop within a travel plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub travel_plan_id: PlanId,
    pub name: String,
    pub address: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub latitude: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub longitude: Option<Decimal>,
    /// Position in the itinerary, unique within the plan.
    pub visit_order: i32,
    pub arrival_date: Option<Timestamp>,
    pub departure_date: Option<Timestamp>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub budget: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: Timestamp,
}

impl Location {
    pub fn new(
        id: LocationId,
        plan_id: PlanId,
        new: NewLocation,
        visit_order: i32,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            travel_plan_id: plan_id,
            name: new.name,
            address: new.address,
            latitude: new.latitude,
            longitude: new.longitude,
            visit_order,
            arrival_date: new.arrival_date,
            departure_date: new.departure_date,
            budget: new.budget,
            notes: new.notes,
            created_at: now,
        }
    }
}

/// List-view projection of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    #[serde(flatten)]
    pub plan: Plan,
    pub location_count: i64,
}

/// A plan with its locations ordered by `visit_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDetails {
    #[serde(flatten)]
    pub plan: Plan,
    pub locations: Vec<Location>,
}

// ============================================================================
// MUTATION PAYLOADS
// ============================================================================

/// Editable plan fields, used both for creation and for full updates.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanFields {
    pub title: String,
    pub description: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<Decimal>,
    pub currency: String,
    pub is_public: bool,
}

impl PlanFields {
    /// Fields with only a title set and defaults everywhere else.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            start_date: None,
            end_date: None,
            budget: None,
            currency: DEFAULT_CURRENCY.to_string(),
            is_public: false,
        }
    }
}

/// Payload for adding a location to a plan.
///
/// `visit_order: None` asks the store to append the location at the end
/// of the itinerary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewLocation {
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub visit_order: Option<i32>,
    pub arrival_date: Option<Timestamp>,
    pub departure_date: Option<Timestamp>,
    pub budget: Option<Decimal>,
    pub notes: Option<String>,
}

impl NewLocation {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial update of a location. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocationPatch {
    pub name: Option<String>,
    pub address: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub visit_order: Option<i32>,
    pub arrival_date: Option<Timestamp>,
    pub departure_date: Option<Timestamp>,
    pub budget: Option<Decimal>,
    pub notes: Option<String>,
}

impl LocationPatch {
    pub fn apply_to(&self, location: &mut Location) {
        if let Some(name) = &self.name {
            location.name = name.clone();
        }
        if let Some(address) = &self.address {
            location.address = Some(address.clone());
        }
        if let Some(latitude) = self.latitude {
            location.latitude = Some(latitude);
        }
        if let Some(longitude) = self.longitude {
            location.longitude = Some(longitude);
        }
        if let Some(order) = self.visit_order {
            location.visit_order = order;
        }
        if let Some(arrival) = self.arrival_date {
            location.arrival_date = Some(arrival);
        }
        if let Some(departure) = self.departure_date {
            location.departure_date = Some(departure);
        }
        if let Some(budget) = self.budget {
            location.budget = Some(budget);
        }
        if let Some(notes) = &self.notes {
            location.notes = Some(notes.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn sample_location() -> Location {
        Location::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            NewLocation::named("Louvre"),
            1,
            Utc::now(),
        )
    }

    #[test]
    fn test_new_plan_starts_at_version_one() {
        let plan = Plan::new(Uuid::new_v4(), PlanFields::titled("Paris"), Utc::now());
        assert_eq!(plan.version, 1);
        assert_eq!(plan.currency, "USD");
        assert!(!plan.is_public);
        assert_eq!(plan.created_at, plan.updated_at);
    }

    #[test]
    fn test_patch_only_touches_supplied_fields() {
        let mut location = sample_location();
        location.notes = Some("bring tickets".to_string());

        let patch = LocationPatch {
            name: Some("Musée d'Orsay".to_string()),
            visit_order: Some(4),
            ..Default::default()
        };
        patch.apply_to(&mut location);

        assert_eq!(location.name, "Musée d'Orsay");
        assert_eq!(location.visit_order, 4);
        assert_eq!(location.notes.as_deref(), Some("bring tickets"));
    }

    #[test]
    fn test_summary_serializes_flat_with_float_decimals() {
        let mut plan = Plan::new(Uuid::new_v4(), PlanFields::titled("Rome"), Utc::now());
        plan.budget = Some(dec("1500.50"));
        let summary = PlanSummary {
            plan,
            location_count: 3,
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["location_count"], 3);
        assert_eq!(json["title"], "Rome");
        assert_eq!(json["budget"], 1500.5);
    }

    #[test]
    fn test_entity_type_display() {
        assert_eq!(EntityType::Plan.to_string(), "Travel plan");
        assert_eq!(EntityType::Location.as_str(), "location");
    }
}
