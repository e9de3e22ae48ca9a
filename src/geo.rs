//! Small port and region gazetteer.
//!
//! Maps the free-text regions callers pass to `assess` onto known ports with
//! coordinates, so coordinate-based sources (weather, imagery, vessel bounds)
//! can be queried.

use crate::sources::vessels::AreaBounds;
use crate::types::Location;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Port {
    pub name: &'static str,
    pub country: &'static str,
    pub region: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Port {
    pub fn location(&self) -> Location {
        Location::at(self.name, self.lat, self.lon)
    }

    /// Whether `region` names this port, its country or its region.
    pub fn in_region(&self, region: &str) -> bool {
        let region = region.trim();
        [self.name, self.country, self.region]
            .iter()
            .any(|name| name.eq_ignore_ascii_case(region))
    }
}

pub const PORTS: &[Port] = &[
    Port { name: "Shanghai", country: "China", region: "Asia", lat: 31.23, lon: 121.47 },
    Port { name: "Singapore", country: "Singapore", region: "Asia", lat: 1.26, lon: 103.84 },
    Port { name: "Qingdao", country: "China", region: "Asia", lat: 36.07, lon: 120.38 },
    Port { name: "Busan", country: "South Korea", region: "Asia", lat: 35.10, lon: 129.04 },
    Port { name: "Rotterdam", country: "Netherlands", region: "Europe", lat: 51.95, lon: 4.14 },
    Port { name: "Hamburg", country: "Germany", region: "Europe", lat: 53.54, lon: 9.97 },
    Port { name: "Antwerp", country: "Belgium", region: "Europe", lat: 51.26, lon: 4.40 },
    Port { name: "Los Angeles", country: "USA", region: "North America", lat: 33.73, lon: -118.26 },
    Port { name: "Long Beach", country: "USA", region: "North America", lat: 33.75, lon: -118.21 },
    Port { name: "Dubai", country: "UAE", region: "Middle East", lat: 25.01, lon: 55.06 },
    Port { name: "Suez Canal", country: "Egypt", region: "Middle East", lat: 30.58, lon: 32.27 },
    Port { name: "Panama Canal", country: "Panama", region: "Central America", lat: 9.08, lon: -79.68 },
];

/// Margin added around port coordinates when building vessel search bounds.
const BOUNDS_MARGIN_DEG: f64 = 2.0;

pub fn find_port(name: &str) -> Option<&'static Port> {
    let needle = name.trim();
    PORTS.iter().find(|p| p.name.eq_ignore_ascii_case(needle))
}

/// Ports covered by a region: an exact port name, or every port in a named region.
pub fn resolve_region(region: &str) -> Vec<&'static Port> {
    if let Some(port) = find_port(region) {
        return vec![port];
    }
    let needle = region.trim();
    PORTS
        .iter()
        .filter(|p| p.region.eq_ignore_ascii_case(needle))
        .collect()
}

/// Bounding box around the ports of a region, clamped to valid coordinates.
pub fn bounds_for_region(region: &str) -> Option<AreaBounds> {
    let ports = resolve_region(region);
    if ports.is_empty() {
        return None;
    }
    let mut bounds = AreaBounds {
        min_lat: f64::MAX,
        max_lat: f64::MIN,
        min_lon: f64::MAX,
        max_lon: f64::MIN,
    };
    for p in ports {
        bounds.min_lat = bounds.min_lat.min(p.lat);
        bounds.max_lat = bounds.max_lat.max(p.lat);
        bounds.min_lon = bounds.min_lon.min(p.lon);
        bounds.max_lon = bounds.max_lon.max(p.lon);
    }
    bounds.min_lat = (bounds.min_lat - BOUNDS_MARGIN_DEG).max(-90.0);
    bounds.max_lat = (bounds.max_lat + BOUNDS_MARGIN_DEG).min(90.0);
    bounds.min_lon = (bounds.min_lon - BOUNDS_MARGIN_DEG).max(-180.0);
    bounds.max_lon = (bounds.max_lon + BOUNDS_MARGIN_DEG).min(180.0);
    Some(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_port_case_insensitive() {
        assert_eq!(find_port("  shanghai ").map(|p| p.country), Some("China"));
        assert!(find_port("Atlantis").is_none());
    }

    #[test]
    fn test_port_in_region_by_name_country_or_region() {
        let busan = find_port("Busan").expect("busan");
        assert!(busan.in_region("busan"));
        assert!(busan.in_region("South Korea"));
        assert!(busan.in_region(" asia "));
        assert!(!busan.in_region("USA"));
        assert!(!busan.in_region("Korea"));
    }

    #[test]
    fn test_resolve_region_groups() {
        let europe = resolve_region("europe");
        assert_eq!(europe.len(), 3);
        assert_eq!(resolve_region("Rotterdam").len(), 1);
        assert!(resolve_region("Pacific").is_empty());
    }

    #[test]
    fn test_bounds_contain_ports() {
        let b = bounds_for_region("North America").expect("bounds");
        assert!(b.min_lat < 33.73 && b.max_lat > 33.75);
        assert!(b.min_lon < -118.26 && b.max_lon > -118.21);
        assert!(bounds_for_region("nowhere").is_none());
    }
}
