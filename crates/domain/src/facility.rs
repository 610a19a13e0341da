//! Facility — the canonical operational state of one hospital.
//!
//! A [`FacilityEntity`] is owned by the cache; views only ever see immutable
//! snapshots of it. Every change goes through [`crate::merge::merge`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MedSyncError, ValidationError};
use crate::id::HospitalId;
use crate::time::Version;

/// Occupancy at or above which a facility is reported as unavailable.
pub const UNAVAILABLE_OCCUPANCY: f64 = 95.0;
/// Occupancy at or above which a facility is reported as limited.
pub const LIMITED_OCCUPANCY: f64 = 80.0;

/// Coarse availability badge of a facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Available,
    Limited,
    Unavailable,
    #[default]
    Unknown,
}

impl AvailabilityStatus {
    /// Derive the badge from an occupancy percentage.
    #[must_use]
    pub fn from_occupancy(occupancy_rate: f64) -> Self {
        if occupancy_rate >= UNAVAILABLE_OCCUPANCY {
            Self::Unavailable
        } else if occupancy_rate >= LIMITED_OCCUPANCY {
            Self::Limited
        } else {
            Self::Available
        }
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Limited => f.write_str("limited"),
            Self::Unavailable => f.write_str("unavailable"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Error returned when parsing an unknown availability status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown availability status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for AvailabilityStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "limited" => Ok(Self::Limited),
            "unavailable" => Ok(Self::Unavailable),
            "unknown" => Ok(Self::Unknown),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// Live operational counters of a facility.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealTimeData {
    pub total_beds: u32,
    pub available_beds: u32,
    /// Percentage, `0.0..=100.0`.
    pub occupancy_rate: f64,
    pub connected_staff: u32,
    /// Minutes.
    pub average_wait_time: u32,
    pub active_admissions: u32,
    pub departments: u32,
    pub availability_status: AvailabilityStatus,
}

/// Canonical cached state of one hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityEntity {
    pub hospital_id: HospitalId,
    pub name: String,
    pub specialties: Vec<String>,
    pub facilities: Vec<String>,
    pub real_time_data: RealTimeData,
    /// Version of the newest update folded into this entity.
    pub version: Version,
}

impl FacilityEntity {
    /// Create a builder for constructing a [`FacilityEntity`].
    #[must_use]
    pub fn builder() -> FacilityBuilder {
        FacilityBuilder::default()
    }

    /// An entity with nothing but its identity, the starting point for the
    /// first merge of a freshly fetched facility.
    #[must_use]
    pub fn vacant(hospital_id: HospitalId) -> Self {
        Self {
            hospital_id,
            name: String::new(),
            specialties: Vec::new(),
            facilities: Vec::new(),
            real_time_data: RealTimeData::default(),
            version: Version::ZERO,
        }
    }

    /// Check the bed and occupancy invariants.
    ///
    /// # Errors
    ///
    /// Returns [`MedSyncError::Validation`] when `availableBeds > totalBeds`
    /// or the occupancy rate lies outside `0..=100`.
    pub fn validate(&self) -> Result<(), MedSyncError> {
        let rt = &self.real_time_data;
        if rt.available_beds > rt.total_beds {
            return Err(ValidationError::AvailableExceedsTotal {
                available: rt.available_beds,
                total: rt.total_beds,
            }
            .into());
        }
        if !(0.0..=100.0).contains(&rt.occupancy_rate) {
            return Err(ValidationError::OccupancyOutOfRange.into());
        }
        Ok(())
    }
}

/// Step-by-step builder for [`FacilityEntity`].
#[derive(Debug, Default)]
pub struct FacilityBuilder {
    hospital_id: Option<HospitalId>,
    name: Option<String>,
    specialties: Vec<String>,
    facilities: Vec<String>,
    real_time_data: RealTimeData,
    version: Version,
}

impl FacilityBuilder {
    #[must_use]
    pub fn hospital_id(mut self, hospital_id: HospitalId) -> Self {
        self.hospital_id = Some(hospital_id);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialties.push(specialty.into());
        self
    }

    #[must_use]
    pub fn facility(mut self, facility: impl Into<String>) -> Self {
        self.facilities.push(facility.into());
        self
    }

    #[must_use]
    pub fn beds(mut self, available: u32, total: u32) -> Self {
        self.real_time_data.available_beds = available;
        self.real_time_data.total_beds = total;
        self
    }

    /// Set the occupancy rate and derive the matching availability status.
    #[must_use]
    pub fn occupancy_rate(mut self, occupancy_rate: f64) -> Self {
        self.real_time_data.occupancy_rate = occupancy_rate;
        self.real_time_data.availability_status =
            AvailabilityStatus::from_occupancy(occupancy_rate);
        self
    }

    #[must_use]
    pub fn real_time_data(mut self, real_time_data: RealTimeData) -> Self {
        self.real_time_data = real_time_data;
        self
    }

    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Consume the builder, validate, and return a [`FacilityEntity`].
    ///
    /// # Errors
    ///
    /// Returns [`MedSyncError::Validation`] if the hospital id or name is
    /// missing, or a bed/occupancy invariant does not hold.
    pub fn build(self) -> Result<FacilityEntity, MedSyncError> {
        let hospital_id = self.hospital_id.ok_or(ValidationError::EmptyHospitalId)?;
        let name = self.name.unwrap_or_default();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        let entity = FacilityEntity {
            hospital_id,
            name,
            specialties: self.specialties,
            facilities: self.facilities,
            real_time_data: self.real_time_data,
            version: self.version,
        };
        entity.validate()?;
        Ok(entity)
    }
}
