//! Vehicle snapshots: live positions joined with route and trip context.

use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::models::{Route, Trip, Vehicle};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VehicleSnapshot {
    #[serde(flatten)]
    pub vehicle: Vehicle,
    pub route_name: Option<String>,
    pub headsign: Option<String>,
}

pub fn vehicle_snapshots(
    vehicles: &[Vehicle],
    routes: &[Route],
    trips: &[Trip],
) -> Vec<VehicleSnapshot> {
    let route_names: HashMap<&str, &Route> = routes.iter().map(|r| (r.id.as_str(), r)).collect();
    let trip_headsigns: HashMap<&str, &str> = trips
        .iter()
        .filter_map(|t| t.headsign.as_deref().map(|h| (t.id.as_str(), h)))
        .collect();

    vehicles
        .iter()
        .map(|vehicle| VehicleSnapshot {
            vehicle: vehicle.clone(),
            route_name: vehicle.route_id.as_deref().and_then(|rid| {
                route_names
                    .get(rid)
                    .and_then(|r| r.long_name.clone().or_else(|| r.short_name.clone()))
            }),
            headsign: vehicle
                .trip_id
                .as_deref()
                .and_then(|tid| trip_headsigns.get(tid).map(|h| h.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_joins_route_and_trip() {
        let vehicles = vec![Vehicle {
            id: "v1".to_string(),
            label: None,
            latitude: None,
            longitude: None,
            bearing: None,
            current_status: None,
            direction_id: None,
            updated_at: None,
            route_id: Some("Red".to_string()),
            trip_id: Some("T1".to_string()),
            stop_id: None,
        }];
        let routes = vec![Route {
            id: "Red".to_string(),
            short_name: None,
            long_name: Some("Red Line".to_string()),
            route_type: Some(1),
            color: None,
            text_color: None,
            direction_names: vec![],
            direction_destinations: vec![],
            sort_order: None,
            line_id: None,
        }];
        let trips = vec![Trip {
            id: "T1".to_string(),
            headsign: Some("Alewife".to_string()),
            name: None,
            direction_id: Some(0),
            route_id: Some("Red".to_string()),
            shape_id: None,
        }];

        let snapshots = vehicle_snapshots(&vehicles, &routes, &trips);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].route_name.as_deref(), Some("Red Line"));
        assert_eq!(snapshots[0].headsign.as_deref(), Some("Alewife"));
    }

    #[test]
    fn test_snapshot_with_no_matches_keeps_vehicle() {
        let vehicles = vec![Vehicle {
            id: "v1".to_string(),
            label: None,
            latitude: None,
            longitude: None,
            bearing: None,
            current_status: None,
            direction_id: None,
            updated_at: None,
            route_id: None,
            trip_id: None,
            stop_id: None,
        }];
        let snapshots = vehicle_snapshots(&vehicles, &[], &[]);
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].route_name.is_none());
        assert!(snapshots[0].headsign.is_none());
    }
}
