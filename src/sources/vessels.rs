//! Vessel tracking (MarineTraffic export API).
//!
//! Live delay per vessel is the gap between MarineTraffic's calculated ETA
//! and the ETA the master reported. Simulation places vessels inside the
//! search bounds with seeded delays.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UpstreamError, ValidationError};
use crate::geo;

use super::http::{json_f64, json_str};
use super::simulate::{round2, SimRng};
use super::LiveContext;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl AreaBounds {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for lat in [self.min_lat, self.max_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(ValidationError::new("bounds", format!("latitude {} out of range", lat)));
            }
        }
        for lon in [self.min_lon, self.max_lon] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(ValidationError::new("bounds", format!("longitude {} out of range", lon)));
            }
        }
        if self.min_lat >= self.max_lat || self.min_lon >= self.max_lon {
            return Err(ValidationError::new("bounds", "min must be below max"));
        }
        Ok(())
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselQuery {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<AreaBounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
}

impl VesselQuery {
    /// Query for a region, with bounds taken from the gazetteer when known.
    pub fn for_region(region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            bounds: geo::bounds_for_region(&region),
            region,
            vessel_type: None,
            port_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.region.trim().is_empty() {
            return Err(ValidationError::new("region", "must not be blank"));
        }
        if let Some(bounds) = &self.bounds {
            bounds.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselPosition {
    pub mmsi: String,
    pub ship_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_type: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub speed_knots: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub delay_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselReport {
    pub region: String,
    pub vessels: Vec<VesselPosition>,
    pub average_delay_hours: f64,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

impl VesselReport {
    pub fn new(region: impl Into<String>, vessels: Vec<VesselPosition>, confidence: f64) -> Self {
        let average_delay_hours = if vessels.is_empty() {
            0.0
        } else {
            round2(vessels.iter().map(|v| v.delay_hours).sum::<f64>() / vessels.len() as f64)
        };
        Self {
            region: region.into(),
            vessels,
            average_delay_hours,
            confidence,
            observed_at: Utc::now(),
        }
    }

    /// First vessel with the largest delay.
    pub fn most_delayed(&self) -> Option<&VesselPosition> {
        self.vessels.iter().fold(None, |best: Option<&VesselPosition>, v| match best {
            Some(b) if b.delay_hours >= v.delay_hours => Some(b),
            _ => Some(v),
        })
    }
}

// ---------------------------------------------------------------------------
// Live
// ---------------------------------------------------------------------------

pub async fn fetch_live(ctx: &LiveContext, query: &VesselQuery) -> Result<VesselReport, UpstreamError> {
    let mut params: Vec<(&str, String)> = vec![
        ("key", ctx.api_key.clone()),
        ("v", "8".to_string()),
        ("protocol", "jsono".to_string()),
        ("msgtype", "extended".to_string()),
    ];
    if let Some(b) = &query.bounds {
        params.push(("minlat", b.min_lat.to_string()));
        params.push(("maxlat", b.max_lat.to_string()));
        params.push(("minlon", b.min_lon.to_string()));
        params.push(("maxlon", b.max_lon.to_string()));
    }
    if let Some(t) = &query.vessel_type {
        params.push(("shiptype", t.clone()));
    }
    if let Some(p) = &query.port_id {
        params.push(("portid", p.clone()));
    }

    let body = ctx.http.get_json(&ctx.base_url, &params).await?;
    let rows = body
        .as_array()
        .ok_or_else(|| UpstreamError::Malformed("expected an array of vessels".to_string()))?;
    let vessels = rows.iter().filter_map(parse_vessel).collect();
    Ok(VesselReport::new(query.region.clone(), vessels, ctx.confidence))
}

fn parse_vessel(row: &serde_json::Value) -> Option<VesselPosition> {
    let lat = json_f64(row, "LAT")?;
    let lon = json_f64(row, "LON")?;
    let delay_hours = match (json_str(row, "ETA"), json_str(row, "ETA_CALC")) {
        (Some(reported), Some(calculated)) => eta_gap_hours(&reported, &calculated).unwrap_or(0.0),
        _ => 0.0,
    };
    Some(VesselPosition {
        mmsi: json_str(row, "MMSI").unwrap_or_default(),
        ship_name: json_str(row, "SHIPNAME").unwrap_or_else(|| "Unknown vessel".to_string()),
        ship_type: json_str(row, "SHIPTYPE"),
        lat,
        lon,
        // MarineTraffic reports speed in tenths of a knot
        speed_knots: json_f64(row, "SPEED").map(|s| s / 10.0).unwrap_or(0.0),
        destination: json_str(row, "DESTINATION"),
        delay_hours: round2(delay_hours),
    })
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Hours by which the calculated ETA trails the reported one; early is zero.
fn eta_gap_hours(reported: &str, calculated: &str) -> Option<f64> {
    let reported = parse_timestamp(reported)?;
    let calculated = parse_timestamp(calculated)?;
    let minutes = (calculated - reported).num_minutes();
    Some((minutes as f64 / 60.0).max(0.0))
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

const SHIP_NAMES: &[&str] = &[
    "Ever Given",
    "MSC Gulsun",
    "CMA CGM Jacques Saade",
    "Maersk Mc-Kinney Moller",
    "HMM Algeciras",
    "ONE Innovation",
    "Cosco Shipping Universe",
    "Hapag Berlin Express",
];

const SHIP_TYPES: &[&str] = &["Container Ship", "Bulk Carrier", "Tanker", "Ro-Ro"];

pub fn simulate(query: &VesselQuery, rng: &mut SimRng) -> VesselReport {
    let bounds = query.bounds.unwrap_or(AreaBounds {
        min_lat: -60.0,
        max_lat: 60.0,
        min_lon: -180.0,
        max_lon: 180.0,
    });
    // Regional congestion baseline, then per-vessel spread around it
    let baseline = rng.uniform(0.0, 30.0);
    let count = rng.int(3, 8);
    let vessels = (0..count)
        .map(|i| {
            let name = rng.pick(SHIP_NAMES).copied().unwrap_or("Unknown vessel");
            VesselPosition {
                mmsi: format!("{}", 200_000_000 + rng.int(0, 99_999_999)),
                ship_name: format!("{} {}", name, i + 1),
                ship_type: rng.pick(SHIP_TYPES).map(|s| s.to_string()),
                lat: rng.uniform(bounds.min_lat, bounds.max_lat),
                lon: rng.uniform(bounds.min_lon, bounds.max_lon),
                speed_knots: round2(rng.uniform(0.0, 22.0)),
                destination: geo::resolve_region(&query.region).first().map(|p| p.name.to_string()),
                delay_hours: round2((baseline + rng.uniform(-8.0, 16.0)).max(0.0)),
            }
        })
        .collect();
    let confidence = rng.confidence();
    VesselReport::new(query.region.clone(), vessels, confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    fn vessel(name: &str, delay: f64) -> VesselPosition {
        VesselPosition {
            mmsi: "1".to_string(),
            ship_name: name.to_string(),
            ship_type: None,
            lat: 0.0,
            lon: 0.0,
            speed_knots: 10.0,
            destination: None,
            delay_hours: delay,
        }
    }

    #[test]
    fn test_validation() {
        assert!(VesselQuery::for_region("Asia").validate().is_ok());
        assert!(VesselQuery::for_region("  ").validate().is_err());
        let mut q = VesselQuery::for_region("Asia");
        q.bounds = Some(AreaBounds { min_lat: 10.0, max_lat: 5.0, min_lon: 0.0, max_lon: 1.0 });
        assert!(q.validate().is_err());
        q.bounds = Some(AreaBounds { min_lat: 0.0, max_lat: 95.0, min_lon: 0.0, max_lon: 1.0 });
        assert_eq!(q.validate().unwrap_err().field, "bounds");
    }

    #[test]
    fn test_report_average_and_most_delayed() {
        let report = VesselReport::new("Asia", vec![vessel("A", 10.0), vessel("B", 30.0), vessel("C", 30.0)], 0.9);
        assert!((report.average_delay_hours - 23.33).abs() < 1e-9);
        assert_eq!(report.most_delayed().map(|v| v.ship_name.as_str()), Some("B"));
        assert!(VesselReport::new("Asia", vec![], 0.9).most_delayed().is_none());
    }

    #[test]
    fn test_parse_vessel_row() {
        let row = serde_json::json!({
            "MMSI": "244650000", "SHIPNAME": "ROTTERDAM EXPRESS", "LAT": "51.95", "LON": 4.1,
            "SPEED": "125", "ETA": "2024-01-10T06:00:00", "ETA_CALC": "2024-01-11 08:30:00"
        });
        let v = parse_vessel(&row).expect("vessel");
        assert_eq!(v.speed_knots, 12.5);
        assert_eq!(v.delay_hours, 26.5);
        assert!(parse_vessel(&serde_json::json!({ "SHIPNAME": "no position" })).is_none());
    }

    #[test]
    fn test_early_arrival_is_not_a_delay() {
        assert_eq!(eta_gap_hours("2024-01-10 06:00:00", "2024-01-10 02:00:00"), Some(0.0));
        assert_eq!(eta_gap_hours("garbage", "2024-01-10 02:00:00"), None);
    }

    #[test]
    fn test_simulation_stays_inside_bounds() {
        let sim = SimulationConfig::default();
        let query = VesselQuery::for_region("Europe");
        let bounds = query.bounds.expect("bounds");
        let mut rng = SimRng::from_seed(9, &sim);
        let report = simulate(&query, &mut rng);
        assert!((3..=8).contains(&report.vessels.len()));
        assert!(report.vessels.iter().all(|v| bounds.contains(v.lat, v.lon) && v.delay_hours >= 0.0));
    }
}
