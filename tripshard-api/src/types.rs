//! API Request and Response Types
//!
//! Request bodies for the travel plan and location endpoints, and their
//! conversion into the storage mutation payloads. Responses reuse the core
//! entities directly.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tripshard_core::{
    Location, LocationPatch, NewLocation, PlanFields, Timestamp, Version, DEFAULT_CURRENCY,
};

// ============================================================================
// TRAVEL PLAN TYPES
// ============================================================================

/// Request to create a new travel plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePlanRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub budget: Option<Decimal>,
    /// ISO 4217 code, defaults to USD
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub is_public: bool,
}

impl CreatePlanRequest {
    pub fn into_fields(self) -> PlanFields {
        PlanFields {
            title: self.title,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            budget: self.budget,
            currency: self.currency,
            is_public: self.is_public,
        }
    }
}

/// Full replacement of a plan's editable fields, guarded by `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePlanRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub budget: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub is_public: bool,
    /// Version the caller last read
    pub version: Version,
}

impl UpdatePlanRequest {
    pub fn into_parts(self) -> (Version, PlanFields) {
        let fields = PlanFields {
            title: self.title,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            budget: self.budget,
            currency: self.currency,
            is_public: self.is_public,
        };
        (self.version, fields)
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

// ============================================================================
// LOCATION TYPES
// ============================================================================

/// Request to add a location to a plan.
///
/// Without `visit_order` the location is appended after the current last stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLocationRequest {
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub latitude: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub longitude: Option<Decimal>,
    #[serde(default)]
    pub visit_order: Option<i32>,
    #[serde(default)]
    pub arrival_date: Option<Timestamp>,
    #[serde(default)]
    pub departure_date: Option<Timestamp>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub budget: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Version of the owning plan the caller last read
    pub version: Version,
}

impl CreateLocationRequest {
    pub fn into_parts(self) -> (Version, NewLocation) {
        let new = NewLocation {
            name: self.name,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            visit_order: self.visit_order,
            arrival_date: self.arrival_date,
            departure_date: self.departure_date,
            budget: self.budget,
            notes: self.notes,
        };
        (self.version, new)
    }
}

/// Partial location update. Omitted fields keep their stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateLocationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub latitude: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub longitude: Option<Decimal>,
    #[serde(default)]
    pub visit_order: Option<i32>,
    #[serde(default)]
    pub arrival_date: Option<Timestamp>,
    #[serde(default)]
    pub departure_date: Option<Timestamp>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub budget: Option<Decimal>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Version of the owning plan the caller last read
    pub version: Version,
}

impl UpdateLocationRequest {
    pub fn into_parts(self) -> (Version, LocationPatch) {
        let patch = LocationPatch {
            name: self.name,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            visit_order: self.visit_order,
            arrival_date: self.arrival_date,
            departure_date: self.departure_date,
            budget: self.budget,
            notes: self.notes,
        };
        (self.version, patch)
    }
}

/// `?version=N` on delete endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionQuery {
    pub version: Option<Version>,
}

/// A written location with the plan version the write produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResponse {
    #[serde(flatten)]
    pub location: Location,
    pub plan_version: Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_create_plan_defaults() -> Result<(), serde_json::Error> {
        let req: CreatePlanRequest = serde_json::from_str(r#"{"title":"Lisbon"}"#)?;
        assert_eq!(req.currency, "USD");
        assert!(!req.is_public);
        assert_eq!(req.budget, None);

        let fields = req.into_fields();
        assert_eq!(fields, PlanFields::titled("Lisbon"));
        Ok(())
    }

    #[test]
    fn test_update_plan_requires_version() {
        let missing: Result<UpdatePlanRequest, _> = serde_json::from_str(r#"{"title":"Lisbon"}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn test_decimal_fields_accept_json_numbers() -> Result<(), Box<dyn std::error::Error>> {
        let req: CreateLocationRequest = serde_json::from_str(
            r#"{"name":"Alfama","latitude":38.711,"longitude":-9.13,"budget":120.5,"version":2}"#,
        )?;
        let (version, new) = req.into_parts();
        assert_eq!(version, 2);
        assert_eq!(new.latitude, Some(Decimal::from_str("38.711")?));
        assert_eq!(new.longitude, Some(Decimal::from_str("-9.13")?));
        assert_eq!(new.budget, Some(Decimal::from_str("120.5")?));
        assert_eq!(new.visit_order, None);
        Ok(())
    }

    #[test]
    fn test_location_patch_keeps_omitted_fields_empty() -> Result<(), serde_json::Error> {
        let req: UpdateLocationRequest =
            serde_json::from_str(r#"{"notes":"closed on mondays","version":4}"#)?;
        let (version, patch) = req.into_parts();
        assert_eq!(version, 4);
        assert_eq!(patch.notes.as_deref(), Some("closed on mondays"));
        assert_eq!(patch.name, None);
        assert_eq!(patch.visit_order, None);
        Ok(())
    }

    #[test]
    fn test_version_query_is_optional() -> Result<(), serde_json::Error> {
        let empty: VersionQuery = serde_json::from_str("{}")?;
        assert_eq!(empty.version, None);
        Ok(())
    }
}
