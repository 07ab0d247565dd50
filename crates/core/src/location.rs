use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A fixed fulfillment site with a cap on warehouse count and on the
/// capacity any single warehouse there may declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub identification: String,
    pub max_number_of_warehouses: i64,
    pub max_capacity: i64,
}

impl Location {
    fn new(identification: &str, max_number_of_warehouses: i64, max_capacity: i64) -> Self {
        Self {
            identification: identification.to_string(),
            max_number_of_warehouses,
            max_capacity,
        }
    }
}

/// Read-only directory of the known fulfillment locations.
///
/// The set is fixed at startup; lookups are by exact identifier,
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct LocationDirectory {
    locations: Vec<Location>,
}

impl LocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a location by its identifier.
    pub fn resolve(&self, identifier: &str) -> Result<&Location, LocationError> {
        if identifier.is_empty() {
            return Err(LocationError::EmptyIdentifier);
        }

        self.locations
            .iter()
            .find(|location| location.identification.eq_ignore_ascii_case(identifier))
            .ok_or_else(|| LocationError::Unknown(identifier.to_string()))
    }

    /// Returns every known location.
    pub fn all(&self) -> &[Location] {
        &self.locations
    }
}

impl Default for LocationDirectory {
    fn default() -> Self {
        Self {
            locations: vec![
                Location::new("ZWOLLE-001", 1, 40),
                Location::new("ZWOLLE-002", 2, 50),
                Location::new("AMSTERDAM-001", 5, 100),
                Location::new("AMSTERDAM-002", 3, 75),
                Location::new("TILBURG-001", 1, 40),
                Location::new("HELMOND-001", 1, 45),
                Location::new("EINDHOVEN-001", 2, 70),
                Location::new("VETSBY-001", 1, 90),
            ],
        }
    }
}

/// Errors raised when resolving a location identifier.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("location identifier must not be empty")]
    EmptyIdentifier,
    #[error("location not found for identifier: {0}")]
    Unknown(String),
}
