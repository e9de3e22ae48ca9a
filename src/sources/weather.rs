//! Weather at shipping locations (OpenWeatherMap current conditions).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{UpstreamError, ValidationError};
use crate::geo::Port;

use super::http::{json_f64, json_str};
use super::simulate::{round2, SimRng};
use super::LiveContext;

const MS_TO_KNOTS: f64 = 1.94384;
/// OpenWeatherMap omits visibility in clear air; its cap is 10 km.
const DEFAULT_VISIBILITY_M: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSite {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

impl From<&Port> for WeatherSite {
    fn from(port: &Port) -> Self {
        Self {
            name: port.name.to_string(),
            lat: port.lat,
            lon: port.lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherQuery {
    pub locations: Vec<WeatherSite>,
}

impl WeatherQuery {
    pub fn new(locations: Vec<WeatherSite>) -> Self {
        Self { locations }
    }

    /// One current-conditions call per site.
    pub fn upstream_requests(&self) -> u32 {
        self.locations.len() as u32
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.locations.is_empty() {
            return Err(ValidationError::new("locations", "at least one location is required"));
        }
        for site in &self.locations {
            if site.name.trim().is_empty() {
                return Err(ValidationError::new("locations", "location name must not be blank"));
            }
            if !(-90.0..=90.0).contains(&site.lat) || !(-180.0..=180.0).contains(&site.lon) {
                return Err(ValidationError::new(
                    "locations",
                    format!("{} has invalid coordinates ({}, {})", site.name, site.lat, site.lon),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub location: String,
    pub lat: f64,
    pub lon: f64,
    pub wind_speed_knots: f64,
    pub visibility_km: f64,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub observations: Vec<WeatherObservation>,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

pub async fn fetch_live(ctx: &LiveContext, query: &WeatherQuery) -> Result<WeatherReport, UpstreamError> {
    let mut observations = Vec::with_capacity(query.locations.len());
    for site in &query.locations {
        let params = [
            ("lat", site.lat.to_string()),
            ("lon", site.lon.to_string()),
            ("appid", ctx.api_key.clone()),
            ("units", "metric".to_string()),
        ];
        let body = ctx.http.get_json(&ctx.base_url, &params).await?;
        observations.push(parse_current(site, &body)?);
    }
    Ok(WeatherReport {
        observations,
        confidence: ctx.confidence,
        observed_at: Utc::now(),
    })
}

fn parse_current(site: &WeatherSite, body: &serde_json::Value) -> Result<WeatherObservation, UpstreamError> {
    let wind = body
        .get("wind")
        .and_then(|w| json_f64(w, "speed"))
        .ok_or_else(|| UpstreamError::Malformed(format!("no wind speed for {}", site.name)))?;
    let visibility_m = json_f64(body, "visibility").unwrap_or(DEFAULT_VISIBILITY_M);
    let condition = body
        .get("weather")
        .and_then(|w| w.get(0))
        .and_then(|w| json_str(w, "description"))
        .unwrap_or_else(|| "unknown".to_string());
    Ok(WeatherObservation {
        location: site.name.clone(),
        lat: site.lat,
        lon: site.lon,
        wind_speed_knots: round2(wind * MS_TO_KNOTS),
        visibility_km: round2(visibility_m / 1000.0),
        condition,
        temperature_c: body.get("main").and_then(|m| json_f64(m, "temp")),
    })
}

const CONDITIONS: &[&str] = &["clear sky", "scattered clouds", "light rain", "overcast clouds", "mist"];

pub fn simulate(query: &WeatherQuery, rng: &mut SimRng) -> WeatherReport {
    let observations = query
        .locations
        .iter()
        .map(|site| {
            let stormy = rng.chance(0.15);
            let (wind, visibility, condition) = if stormy {
                (rng.uniform(35.0, 65.0), rng.uniform(0.5, 4.0), "storm")
            } else {
                let condition = rng.pick(CONDITIONS).copied().unwrap_or("clear sky");
                (rng.uniform(2.0, 30.0), rng.uniform(4.0, 10.0), condition)
            };
            WeatherObservation {
                location: site.name.clone(),
                lat: site.lat,
                lon: site.lon,
                wind_speed_knots: round2(wind),
                visibility_km: round2(visibility),
                condition: condition.to_string(),
                temperature_c: Some(round2(rng.uniform(-5.0, 35.0))),
            }
        })
        .collect();
    WeatherReport {
        observations,
        confidence: rng.confidence(),
        observed_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    fn site(name: &str, lat: f64, lon: f64) -> WeatherSite {
        WeatherSite { name: name.to_string(), lat, lon }
    }

    #[test]
    fn test_validation() {
        assert!(WeatherQuery::new(vec![site("Rotterdam", 51.95, 4.14)]).validate().is_ok());
        assert_eq!(WeatherQuery::new(vec![]).validate().unwrap_err().field, "locations");
        assert!(WeatherQuery::new(vec![site("Nowhere", 120.0, 0.0)]).validate().is_err());
        assert!(WeatherQuery::new(vec![site(" ", 1.0, 1.0)]).validate().is_err());
    }

    #[test]
    fn test_parse_current_converts_units() {
        let body = serde_json::json!({
            "wind": { "speed": 10.0 },
            "visibility": 2500,
            "weather": [{ "description": "heavy rain" }],
            "main": { "temp": 7.5 }
        });
        let obs = parse_current(&site("Hamburg", 53.54, 9.97), &body).expect("parse");
        assert_eq!(obs.wind_speed_knots, 19.44);
        assert_eq!(obs.visibility_km, 2.5);
        assert_eq!(obs.condition, "heavy rain");
        assert_eq!(obs.temperature_c, Some(7.5));
    }

    #[test]
    fn test_parse_current_requires_wind() {
        let body = serde_json::json!({ "visibility": 2500 });
        let err = parse_current(&site("Hamburg", 53.54, 9.97), &body).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }

    #[test]
    fn test_simulation_one_observation_per_site() {
        let sim = SimulationConfig::default();
        let q = WeatherQuery::new(vec![site("A", 1.0, 1.0), site("B", 2.0, 2.0)]);
        let report = simulate(&q, &mut SimRng::from_seed(3, &sim));
        assert_eq!(report.observations.len(), 2);
        assert_eq!(report.observations[1].location, "B");
    }
}
