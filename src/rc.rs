use serde_json::{Value, json};
use std::collections::BTreeMap;

/// A station of the output game board, in normalized canvas coordinates.
#[derive(Debug, Clone)]
pub struct RcStation {
    pub id: i64,
    pub norm_x: f64,
    pub norm_y: f64,
}

/// An end-to-end route over output stations. Called a "line" in the
/// serialized document.
#[derive(Debug, Clone)]
pub struct RcService {
    pub id: i64,
    pub station_ids: Vec<i64>,
    pub is_loop: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RcMap {
    pub stations: BTreeMap<i64, RcStation>,
    pub services: BTreeMap<i64, RcService>,
}

impl RcMap {
    /// Serialize into the board-game document format. Normalized coordinates
    /// are scaled to 1/10000 units and rounded half away from zero.
    pub fn to_json(&self) -> Value {
        let stations: Vec<Value> = self
            .stations
            .values()
            .map(|station| {
                json!([
                    station.id,
                    (station.norm_x * 10000.0).round() as i64,
                    (station.norm_y * 10000.0).round() as i64,
                ])
            })
            .collect();

        let lines: Vec<Value> = self
            .services
            .values()
            .map(|service| {
                json!({
                    "Id": service.id,
                    "Stas": service.station_ids,
                    "IsNotLoop": !service.is_loop,
                })
            })
            .collect();

        json!({ "Stations": stations, "Lines": lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_stations_and_lines() {
        let mut map = RcMap::default();
        map.stations.insert(
            3,
            RcStation {
                id: 3,
                norm_x: 0.5,
                norm_y: 0.25,
            },
        );
        map.services.insert(
            1,
            RcService {
                id: 1,
                station_ids: vec![3, 4],
                is_loop: false,
            },
        );

        let j = map.to_json();
        assert_eq!(j["Stations"][0], json!([3, 5000, 2500]));
        assert_eq!(j["Lines"][0]["Id"], 1);
        assert_eq!(j["Lines"][0]["Stas"], json!([3, 4]));
        assert_eq!(j["Lines"][0]["IsNotLoop"], true);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        let mut map = RcMap::default();
        map.stations.insert(
            1,
            RcStation {
                id: 1,
                norm_x: 0.00005,
                norm_y: -0.00005,
            },
        );
        let j = map.to_json();
        assert_eq!(j["Stations"][0], json!([1, 1, -1]));
    }
}
