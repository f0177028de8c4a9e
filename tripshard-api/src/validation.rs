//! Request Validation
//!
//! Field-level checks run before a request reaches the store. Every failed
//! check is collected so the caller sees all problems at once.

use rust_decimal::Decimal;

use crate::error::{ApiError, ApiResult, FieldError};
use crate::types::{
    CreateLocationRequest, CreatePlanRequest, UpdateLocationRequest, UpdatePlanRequest,
};

/// Maximum length of titles and names, in characters.
pub const MAX_NAME_CHARS: usize = 200;

/// Shape of a `NUMERIC(precision, scale)` column.
#[derive(Debug, Clone, Copy)]
pub struct NumericSpec {
    pub precision: u32,
    pub scale: u32,
}

pub const BUDGET: NumericSpec = NumericSpec {
    precision: 10,
    scale: 2,
};
pub const LATITUDE: NumericSpec = NumericSpec {
    precision: 10,
    scale: 6,
};
pub const LONGITUDE: NumericSpec = NumericSpec {
    precision: 11,
    scale: 6,
};

/// Implemented by request bodies.
pub trait Validate {
    fn validate(&self) -> ApiResult<()>;
}

/// Collects field errors.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, result: Result<(), FieldError>) -> &mut Self {
        if let Err(err) = result {
            self.errors.push(err);
        }
        self
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn finish(self) -> ApiResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation_failed(self.errors))
        }
    }
}

// ============================================================================
// FIELD CHECKS
// ============================================================================

/// Trait for validating non-blank, length-limited strings.
pub trait ValidateNonEmpty {
    fn validate_non_empty(&self, field: &str, max_chars: usize) -> Result<(), FieldError>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field: &str, max_chars: usize) -> Result<(), FieldError> {
        if self.trim().is_empty() {
            return Err(FieldError::new(field, "must not be blank"));
        }
        if self.chars().count() > max_chars {
            return Err(FieldError::new(
                field,
                format!("must be at most {} characters", max_chars),
            ));
        }
        Ok(())
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field: &str, max_chars: usize) -> Result<(), FieldError> {
        self.as_str().validate_non_empty(field, max_chars)
    }
}

/// Trait for validating numeric lower bounds.
pub trait ValidatePositive {
    fn validate_positive(&self, field: &str) -> Result<(), FieldError>;
}

impl ValidatePositive for i32 {
    fn validate_positive(&self, field: &str) -> Result<(), FieldError> {
        if *self < 1 {
            return Err(FieldError::new(field, "must be at least 1"));
        }
        Ok(())
    }
}

/// Three uppercase ASCII letters.
pub fn validate_currency(currency: &str) -> Result<(), FieldError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(FieldError::new(
            "currency",
            "must be a three-letter uppercase ISO 4217 code",
        ))
    }
}

/// Inclusive bounds check.
pub fn validate_range(
    field: &str,
    value: Decimal,
    min: Decimal,
    max: Decimal,
) -> Result<(), FieldError> {
    if value < min || value > max {
        return Err(FieldError::new(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

/// Whether `value` fits a `NUMERIC(precision, scale)` column.
pub fn validate_numeric(field: &str, value: Decimal, spec: NumericSpec) -> Result<(), FieldError> {
    let normalized = value.normalize();
    if normalized.scale() > spec.scale {
        return Err(FieldError::new(
            field,
            format!("can have at most {} decimal places", spec.scale),
        ));
    }
    if integer_digits(normalized) > spec.precision - spec.scale {
        return Err(FieldError::new(
            field,
            format!("exceeds maximum precision ({} digits total)", spec.precision),
        ));
    }
    Ok(())
}

fn integer_digits(value: Decimal) -> u32 {
    let whole = value.trunc().abs();
    if whole.is_zero() {
        0
    } else {
        whole.normalize().to_string().len() as u32
    }
}

fn validate_budget(budget: Option<Decimal>) -> Result<(), FieldError> {
    match budget {
        Some(value) if value.is_sign_negative() && !value.is_zero() => {
            Err(FieldError::new("budget", "must not be negative"))
        }
        Some(value) => validate_numeric("budget", value, BUDGET),
        None => Ok(()),
    }
}

fn validate_coordinates(
    latitude: Option<Decimal>,
    longitude: Option<Decimal>,
    v: &mut Validator,
) {
    if let Some(lat) = latitude {
        v.check(
            validate_range("latitude", lat, Decimal::from(-90), Decimal::from(90))
                .and_then(|_| validate_numeric("latitude", lat, LATITUDE)),
        );
    }
    if let Some(lng) = longitude {
        v.check(
            validate_range("longitude", lng, Decimal::from(-180), Decimal::from(180))
                .and_then(|_| validate_numeric("longitude", lng, LONGITUDE)),
        );
    }
}

/// `later` must not precede `earlier` when both are present.
fn validate_order<T: PartialOrd>(
    earlier: Option<T>,
    later: Option<T>,
    field: &str,
    message: &str,
) -> Result<(), FieldError> {
    match (earlier, later) {
        (Some(a), Some(b)) if b < a => Err(FieldError::new(field, message)),
        _ => Ok(()),
    }
}

// ============================================================================
// REQUEST VALIDATION
// ============================================================================

impl Validate for CreatePlanRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut v = Validator::new();
        v.check(self.title.validate_non_empty("title", MAX_NAME_CHARS))
            .check(validate_currency(&self.currency))
            .check(validate_budget(self.budget))
            .check(validate_order(
                self.start_date,
                self.end_date,
                "end_date",
                "must not be before start_date",
            ));
        v.finish()
    }
}

impl Validate for UpdatePlanRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut v = Validator::new();
        v.check(self.version.validate_positive("version"))
            .check(self.title.validate_non_empty("title", MAX_NAME_CHARS))
            .check(validate_currency(&self.currency))
            .check(validate_budget(self.budget))
            .check(validate_order(
                self.start_date,
                self.end_date,
                "end_date",
                "must not be before start_date",
            ));
        v.finish()
    }
}

impl Validate for CreateLocationRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut v = Validator::new();
        v.check(self.version.validate_positive("version"))
            .check(self.name.validate_non_empty("name", MAX_NAME_CHARS))
            .check(validate_budget(self.budget))
            .check(validate_order(
                self.arrival_date,
                self.departure_date,
                "departure_date",
                "must not be before arrival_date",
            ));
        if let Some(order) = self.visit_order {
            v.check(order.validate_positive("visit_order"));
        }
        validate_coordinates(self.latitude, self.longitude, &mut v);
        v.finish()
    }
}

impl Validate for UpdateLocationRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut v = Validator::new();
        v.check(self.version.validate_positive("version"))
            .check(validate_budget(self.budget))
            .check(validate_order(
                self.arrival_date,
                self.departure_date,
                "departure_date",
                "must not be before arrival_date",
            ));
        if let Some(name) = &self.name {
            v.check(name.validate_non_empty("name", MAX_NAME_CHARS));
        }
        if let Some(order) = self.visit_order {
            v.check(order.validate_positive("visit_order"));
        }
        validate_coordinates(self.latitude, self.longitude, &mut v);
        v.finish()
    }
}
