//! Simulated hospitals and the world they live in.

use rand::Rng;
use serde_json::{Map, Value, json};

use medsync_domain::envelope::UpdateEnvelope;
use medsync_domain::facility::AvailabilityStatus;
use medsync_domain::id::HospitalId;
use medsync_domain::time::{self, Version};
use medsync_domain::topic::Topic;

const ALERTS: [&str; 3] = [
    "Emergency department at capacity, expect delays",
    "Trauma team activated",
    "Blood supply running low",
];

#[derive(Debug, Clone)]
pub(crate) struct VirtualHospital {
    pub(crate) id: HospitalId,
    name: &'static str,
    specialties: &'static [&'static str],
    facilities: &'static [&'static str],
    total_beds: u32,
    available_beds: u32,
    connected_staff: u32,
    average_wait_time: u32,
}

impl VirtualHospital {
    fn new(
        id: HospitalId,
        name: &'static str,
        specialties: &'static [&'static str],
        facilities: &'static [&'static str],
        total_beds: u32,
        available_beds: u32,
    ) -> Self {
        Self {
            id,
            name,
            specialties,
            facilities,
            total_beds,
            available_beds,
            connected_staff: total_beds / 4,
            average_wait_time: 30,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.name
    }

    pub(crate) fn has_specialty(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.specialties
            .iter()
            .any(|s| s.to_lowercase().contains(&needle))
    }

    fn occupancy_rate(&self) -> f64 {
        if self.total_beds == 0 {
            return 0.0;
        }
        let occupied = f64::from(self.total_beds - self.available_beds);
        (occupied * 1000.0 / f64::from(self.total_beds)).round() / 10.0
    }

    fn bed_counters(&self) -> Map<String, Value> {
        let occupancy = self.occupancy_rate();
        let mut counters = Map::new();
        counters.insert("totalBeds".into(), self.total_beds.into());
        counters.insert("availableBeds".into(), self.available_beds.into());
        counters.insert("occupancyRate".into(), occupancy.into());
        counters.insert("connectedStaff".into(), self.connected_staff.into());
        counters.insert("averageWaitTime".into(), self.average_wait_time.into());
        counters.insert(
            "availabilityStatus".into(),
            AvailabilityStatus::from_occupancy(occupancy).to_string().into(),
        );
        counters
    }

    /// The full record as the hospitals API would serve it.
    pub(crate) fn record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("hospitalId".into(), self.id.as_str().into());
        record.insert("name".into(), self.name.into());
        record.insert("specialties".into(), json!(self.specialties));
        record.insert("facilities".into(), json!(self.facilities));
        record.insert("realTimeData".into(), Value::Object(self.bed_counters()));
        record
    }
}

fn seed_hospitals() -> Vec<VirtualHospital> {
    let id = |raw: &str| HospitalId::new(raw).ok();
    [
        id("H1").map(|h| {
            VirtualHospital::new(
                h,
                "St. Mary's General",
                &["Cardiology", "Emergency Medicine", "Internal Medicine"],
                &["ICU", "Pharmacy", "Radiology"],
                40,
                12,
            )
        }),
        id("H2").map(|h| {
            VirtualHospital::new(
                h,
                "Lakeside Children's Hospital",
                &["Pediatrics", "Neonatology"],
                &["NICU", "Playroom"],
                60,
                35,
            )
        }),
        id("H3").map(|h| {
            VirtualHospital::new(
                h,
                "Northside Trauma Center",
                &["Trauma Surgery", "Orthopedics", "Emergency Medicine"],
                &["Helipad", "Operating Theatres", "Blood Bank"],
                25,
                3,
            )
        }),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Shared state of the simulation: every hospital plus a monotonic clock,
/// so pushed frames and fetched records order consistently.
#[derive(Debug)]
pub(crate) struct World {
    hospitals: Vec<VirtualHospital>,
    clock: i64,
}

impl Default for World {
    fn default() -> Self {
        Self {
            hospitals: seed_hospitals(),
            clock: 0,
        }
    }
}

impl World {
    pub(crate) fn hospitals(&self) -> &[VirtualHospital] {
        &self.hospitals
    }

    pub(crate) fn find(&self, hospital_id: &HospitalId) -> Option<&VirtualHospital> {
        self.hospitals.iter().find(|h| &h.id == hospital_id)
    }

    /// Next version, never behind the wall clock and never repeated.
    pub(crate) fn tick(&mut self) -> Version {
        self.clock = (self.clock + 1).max(time::now().timestamp_millis());
        Version::from_millis(self.clock)
    }

    /// Advance one random hospital and describe the change as a push frame.
    pub(crate) fn step<R: Rng>(&mut self, rng: &mut R, alert_probability: f64) -> Option<UpdateEnvelope> {
        if self.hospitals.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.hospitals.len());
        let alert = rng.gen_bool(alert_probability.clamp(0.0, 1.0));
        let version = self.tick();
        let hospital = &mut self.hospitals[index];

        if alert {
            let message = ALERTS[rng.gen_range(0..ALERTS.len())];
            let mut payload = Map::new();
            payload.insert("message".into(), message.into());
            payload.insert("severity".into(), "high".into());
            return Some(UpdateEnvelope::new(
                Topic::EmergencyAlert,
                hospital.id.clone(),
                payload,
                version,
            ));
        }

        let delta: i64 = rng.gen_range(-3..=3);
        let available = (i64::from(hospital.available_beds) + delta)
            .clamp(0, i64::from(hospital.total_beds));
        hospital.available_beds = u32::try_from(available).unwrap_or(hospital.available_beds);
        hospital.average_wait_time = rng.gen_range(10..=120);
        hospital.connected_staff = rng.gen_range(hospital.total_beds / 8..=hospital.total_beds / 3);

        Some(UpdateEnvelope::new(
            Topic::BedStatus,
            hospital.id.clone(),
            hospital.bed_counters(),
            version,
        ))
    }
}
