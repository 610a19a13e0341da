//! Entity merger — folds a partial payload into a facility snapshot.
//!
//! This is the single place that decides whether an update is fresh enough
//! to apply and whether each field value is acceptable. It never mutates the
//! current entity; an accepted update yields a brand-new [`FacilityEntity`].
//!
//! Real-time keys are accepted flat (`{"availableBeds": 9}`) or nested
//! (`{"realTimeData": {"availableBeds": 9}}`). A bad field value only
//! rejects that field; the rest of the payload is still applied.

use serde_json::{Map, Number, Value};

use crate::facility::{AvailabilityStatus, FacilityEntity};
use crate::time::Version;

/// Why a single field of a payload was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("expected a string")]
    NotAString,
    #[error("expected a list of strings")]
    NotAStringList,
    #[error("expected an object")]
    NotAnObject,
    #[error("expected a number")]
    NotANumber,
    #[error("number is not finite")]
    NotFinite,
    #[error("count is negative")]
    Negative,
    #[error("count is fractional")]
    Fractional,
    #[error("count is too large")]
    TooLarge,
    #[error("value is empty")]
    Empty,
    #[error("unknown availability status")]
    UnknownStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRejection {
    pub field: String,
    pub reason: RejectReason,
}

/// A field whose value was pulled back into its valid range.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldClamp {
    pub field: &'static str,
    pub requested: f64,
    pub applied: f64,
}

/// Result of an accepted merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub entity: FacilityEntity,
    pub rejected: Vec<FieldRejection>,
    pub clamped: Vec<FieldClamp>,
    /// Identity and unrecognised keys, skipped silently.
    pub ignored: Vec<String>,
}

impl MergeReport {
    /// Whether every recognised field was applied as given.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.clamped.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Applied(MergeReport),
    /// The incoming version is older than the cached one; nothing changed.
    Stale { current: Version, incoming: Version },
}

/// Fold `patch` into `current` at version `incoming`.
///
/// Equal versions apply, so a refetch stamped with the same server time as
/// the last push still lands.
#[must_use]
pub fn merge(current: &FacilityEntity, patch: &Map<String, Value>, incoming: Version) -> MergeOutcome {
    if incoming < current.version {
        return MergeOutcome::Stale {
            current: current.version,
            incoming,
        };
    }

    let mut fold = Fold::new(current);
    for (key, value) in patch {
        match key.as_str() {
            "id" | "_id" | "hospitalId" => fold.ignored.push(key.clone()),
            "name" => fold.name(value),
            "specialties" => {
                if let Some(list) = fold.string_list(key, value) {
                    fold.entity.specialties = list;
                }
            }
            "facilities" => {
                if let Some(list) = fold.string_list(key, value) {
                    fold.entity.facilities = list;
                }
            }
            "realTimeData" => match value {
                Value::Object(nested) => {
                    for (inner, inner_value) in nested {
                        if !fold.real_time(inner, inner_value) {
                            fold.ignored.push(format!("realTimeData.{inner}"));
                        }
                    }
                }
                _ => fold.reject(key, RejectReason::NotAnObject),
            },
            other => {
                if !fold.real_time(other, value) {
                    fold.ignored.push(other.to_string());
                }
            }
        }
    }

    MergeOutcome::Applied(fold.finish(incoming))
}

struct Fold {
    entity: FacilityEntity,
    rejected: Vec<FieldRejection>,
    clamped: Vec<FieldClamp>,
    ignored: Vec<String>,
    occupancy_changed: bool,
    explicit_status: bool,
}

impl Fold {
    fn new(current: &FacilityEntity) -> Self {
        Self {
            entity: current.clone(),
            rejected: Vec::new(),
            clamped: Vec::new(),
            ignored: Vec::new(),
            occupancy_changed: false,
            explicit_status: false,
        }
    }

    fn reject(&mut self, field: &str, reason: RejectReason) {
        self.rejected.push(FieldRejection {
            field: field.to_string(),
            reason,
        });
    }

    fn name(&mut self, value: &Value) {
        match value.as_str().map(str::trim) {
            Some("") => self.reject("name", RejectReason::Empty),
            Some(name) => self.entity.name = name.to_string(),
            None => self.reject("name", RejectReason::NotAString),
        }
    }

    fn string_list(&mut self, field: &str, value: &Value) -> Option<Vec<String>> {
        let list = value.as_array().and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        });
        if list.is_none() {
            self.reject(field, RejectReason::NotAStringList);
        }
        list
    }

    /// Apply one real-time key. Returns `false` when the key is unknown.
    fn real_time(&mut self, field: &str, value: &Value) -> bool {
        let rt = &mut self.entity.real_time_data;
        let slot = match field {
            "totalBeds" => &mut rt.total_beds,
            "availableBeds" => &mut rt.available_beds,
            "connectedStaff" => &mut rt.connected_staff,
            "averageWaitTime" => &mut rt.average_wait_time,
            "activeAdmissions" => &mut rt.active_admissions,
            "departments" => &mut rt.departments,
            "occupancyRate" => {
                self.occupancy(value);
                return true;
            }
            "availabilityStatus" => {
                self.status(value);
                return true;
            }
            _ => return false,
        };
        match parse_count(value) {
            Ok(count) => *slot = count,
            // The upper bound is applied in `finish`, once `totalBeds` is known.
            Err(RejectReason::Negative) if field == "availableBeds" => {
                *slot = 0;
                self.clamped.push(FieldClamp {
                    field: "availableBeds",
                    requested: value.as_f64().unwrap_or_default(),
                    applied: 0.0,
                });
            }
            Err(reason) => self.reject(field, reason),
        }
        true
    }

    fn occupancy(&mut self, value: &Value) {
        let Some(requested) = value.as_f64() else {
            self.reject("occupancyRate", RejectReason::NotANumber);
            return;
        };
        if !requested.is_finite() {
            self.reject("occupancyRate", RejectReason::NotFinite);
            return;
        }
        let applied = requested.clamp(0.0, 100.0);
        if (applied - requested).abs() > f64::EPSILON {
            self.clamped.push(FieldClamp {
                field: "occupancyRate",
                requested,
                applied,
            });
        }
        self.entity.real_time_data.occupancy_rate = applied;
        self.occupancy_changed = true;
    }

    fn status(&mut self, value: &Value) {
        let Some(raw) = value.as_str() else {
            self.reject("availabilityStatus", RejectReason::NotAString);
            return;
        };
        match raw.parse::<AvailabilityStatus>() {
            Ok(status) => {
                self.entity.real_time_data.availability_status = status;
                self.explicit_status = true;
            }
            Err(_) => self.reject("availabilityStatus", RejectReason::UnknownStatus),
        }
    }

    fn finish(mut self, incoming: Version) -> MergeReport {
        let rt = &mut self.entity.real_time_data;
        if rt.available_beds > rt.total_beds {
            self.clamped.push(FieldClamp {
                field: "availableBeds",
                requested: f64::from(rt.available_beds),
                applied: f64::from(rt.total_beds),
            });
            rt.available_beds = rt.total_beds;
        }
        if self.occupancy_changed && !self.explicit_status {
            rt.availability_status = AvailabilityStatus::from_occupancy(rt.occupancy_rate);
        }
        self.entity.version = incoming;

        MergeReport {
            entity: self.entity,
            rejected: self.rejected,
            clamped: self.clamped,
            ignored: self.ignored,
        }
    }
}

/// Accept a non-negative whole number that fits in `u32`; `12.0` counts as 12.
fn parse_count(value: &Value) -> Result<u32, RejectReason> {
    let Value::Number(number) = value else {
        return Err(RejectReason::NotANumber);
    };
    if let Some(whole) = number.as_u64() {
        return u32::try_from(whole).map_err(|_| RejectReason::TooLarge);
    }
    if number.as_i64().is_some() {
        return Err(RejectReason::Negative);
    }
    count_from_float(number)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count_from_float(number: &Number) -> Result<u32, RejectReason> {
    let float = number.as_f64().ok_or(RejectReason::NotANumber)?;
    if !float.is_finite() {
        return Err(RejectReason::NotFinite);
    }
    if float < 0.0 {
        return Err(RejectReason::Negative);
    }
    if float.fract() > 0.0 {
        return Err(RejectReason::Fractional);
    }
    if float > f64::from(u32::MAX) {
        return Err(RejectReason::TooLarge);
    }
    Ok(float as u32)
}
