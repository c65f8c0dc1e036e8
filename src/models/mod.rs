//! Domain models decoded from the upstream JSON:API resources.
//!
//! Each model pairs a `*Attributes` struct (the raw attribute payload) with a
//! flat domain struct built via `from_resource`, which also pulls relationship
//! ids through the normalized helpers. Handlers and views only ever see the
//! flat structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::providers::jsonapi::Resource;

/// Parse an optional ISO-8601 timestamp attribute into UTC.
pub fn parse_time(value: &Option<String>) -> Option<DateTime<Utc>> {
    value
        .as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
pub struct RouteAttributes {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    #[serde(rename = "type")]
    pub route_type: Option<i32>,
    pub color: Option<String>,
    pub text_color: Option<String>,
    pub direction_names: Option<Vec<Option<String>>>,
    pub direction_destinations: Option<Vec<Option<String>>>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Route {
    pub id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    /// Provider route type code (0 light rail, 1 heavy rail, 2 commuter rail,
    /// 3 bus, 4 ferry)
    pub route_type: Option<i32>,
    pub color: Option<String>,
    pub text_color: Option<String>,
    pub direction_names: Vec<Option<String>>,
    pub direction_destinations: Vec<Option<String>>,
    pub sort_order: Option<i64>,
    /// Parent line id, when the route belongs to a line
    pub line_id: Option<String>,
}

impl Route {
    pub fn from_resource(res: Resource<RouteAttributes>) -> Self {
        let line_id = res.relationship_id("line");
        let attrs = res.attributes;
        Self {
            id: res.id,
            short_name: attrs.short_name,
            long_name: attrs.long_name,
            route_type: attrs.route_type,
            color: attrs.color,
            text_color: attrs.text_color,
            direction_names: attrs.direction_names.unwrap_or_default(),
            direction_destinations: attrs.direction_destinations.unwrap_or_default(),
            sort_order: attrs.sort_order,
            line_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LineAttributes {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Line {
    pub id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub color: Option<String>,
    pub text_color: Option<String>,
    pub sort_order: Option<i64>,
}

impl Line {
    pub fn from_resource(res: Resource<LineAttributes>) -> Self {
        let attrs = res.attributes;
        Self {
            id: res.id,
            short_name: attrs.short_name,
            long_name: attrs.long_name,
            color: attrs.color,
            text_color: attrs.text_color,
            sort_order: attrs.sort_order,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StopAttributes {
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_type: Option<i32>,
    pub platform_name: Option<String>,
    pub municipality: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Stop {
    pub id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Provider location type code (0 platform, 1 station, 2 entrance,
    /// 4 platform variant)
    pub location_type: Option<i32>,
    pub platform_name: Option<String>,
    pub municipality: Option<String>,
    /// Id of the parent station this stop rolls up to, if any
    pub parent_station: Option<String>,
}

impl Stop {
    pub fn from_resource(res: Resource<StopAttributes>) -> Self {
        let parent_station = res.relationship_id("parent_station");
        let attrs = res.attributes;
        Self {
            id: res.id,
            name: attrs.name,
            latitude: attrs.latitude,
            longitude: attrs.longitude,
            location_type: attrs.location_type,
            platform_name: attrs.platform_name,
            municipality: attrs.municipality,
            parent_station,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct VehicleAttributes {
    pub label: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bearing: Option<f64>,
    pub current_status: Option<String>,
    pub direction_id: Option<u8>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Vehicle {
    pub id: String,
    pub label: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub bearing: Option<f64>,
    pub current_status: Option<String>,
    pub direction_id: Option<u8>,
    pub updated_at: Option<DateTime<Utc>>,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub stop_id: Option<String>,
}

impl Vehicle {
    pub fn from_resource(res: Resource<VehicleAttributes>) -> Self {
        let route_id = res.relationship_id("route");
        let trip_id = res.relationship_id("trip");
        let stop_id = res.relationship_id("stop");
        let attrs = res.attributes;
        Self {
            id: res.id,
            label: attrs.label,
            latitude: attrs.latitude,
            longitude: attrs.longitude,
            bearing: attrs.bearing,
            current_status: attrs.current_status,
            direction_id: attrs.direction_id,
            updated_at: parse_time(&attrs.updated_at),
            route_id,
            trip_id,
            stop_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictionAttributes {
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub direction_id: Option<u8>,
    pub stop_sequence: Option<i64>,
    pub status: Option<String>,
}

/// A live predicted departure for one stop along one trip.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Prediction {
    pub id: String,
    pub stop_id: Option<String>,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub direction_id: Option<u8>,
    pub stop_sequence: Option<i64>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    /// Free-text status from the provider (e.g. "Delayed", "Cancelled")
    pub status: Option<String>,
}

impl Prediction {
    pub fn from_resource(res: Resource<PredictionAttributes>) -> Self {
        let stop_id = res.relationship_id("stop");
        let route_id = res.relationship_id("route");
        let trip_id = res.relationship_id("trip");
        let attrs = res.attributes;
        Self {
            id: res.id,
            stop_id,
            route_id,
            trip_id,
            direction_id: attrs.direction_id,
            stop_sequence: attrs.stop_sequence,
            arrival_time: parse_time(&attrs.arrival_time),
            departure_time: parse_time(&attrs.departure_time),
            status: attrs.status,
        }
    }

    /// The time this prediction is anchored to: departure when present,
    /// arrival otherwise.
    pub fn best_time(&self) -> Option<DateTime<Utc>> {
        self.departure_time.or(self.arrival_time)
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleAttributes {
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
    pub direction_id: Option<u8>,
    pub stop_sequence: Option<i64>,
    pub stop_headsign: Option<String>,
}

/// A scheduled departure row for one stop along one trip.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScheduledDeparture {
    pub id: String,
    pub stop_id: Option<String>,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub direction_id: Option<u8>,
    pub stop_sequence: Option<i64>,
    pub arrival_time: Option<DateTime<Utc>>,
    pub departure_time: Option<DateTime<Utc>>,
    pub stop_headsign: Option<String>,
    /// Headsign of the owning trip, resolved from side-loaded trip resources
    pub trip_headsign: Option<String>,
}

impl ScheduledDeparture {
    pub fn from_resource(res: Resource<ScheduleAttributes>) -> Self {
        let stop_id = res.relationship_id("stop");
        let route_id = res.relationship_id("route");
        let trip_id = res.relationship_id("trip");
        let attrs = res.attributes;
        Self {
            id: res.id,
            stop_id,
            route_id,
            trip_id,
            direction_id: attrs.direction_id,
            stop_sequence: attrs.stop_sequence,
            arrival_time: parse_time(&attrs.arrival_time),
            departure_time: parse_time(&attrs.departure_time),
            stop_headsign: attrs.stop_headsign,
            trip_headsign: None,
        }
    }

    pub fn best_time(&self) -> Option<DateTime<Utc>> {
        self.departure_time.or(self.arrival_time)
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertAttributes {
    pub header: Option<String>,
    pub description: Option<String>,
    pub effect: Option<String>,
    pub severity: Option<i32>,
    pub lifecycle: Option<String>,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub informed_entity: Vec<InformedEntity>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct InformedEntity {
    pub route: Option<String>,
    pub stop: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub id: String,
    pub header: Option<String>,
    pub description: Option<String>,
    pub effect: Option<String>,
    pub severity: Option<i32>,
    pub lifecycle: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Route ids this alert applies to, deduplicated
    pub route_ids: Vec<String>,
    /// Stop ids this alert applies to, deduplicated
    pub stop_ids: Vec<String>,
}

impl Alert {
    pub fn from_resource(res: Resource<AlertAttributes>) -> Self {
        let attrs = res.attributes;
        let mut route_ids: Vec<String> = attrs
            .informed_entity
            .iter()
            .filter_map(|e| e.route.clone())
            .collect();
        route_ids.sort();
        route_ids.dedup();
        let mut stop_ids: Vec<String> = attrs
            .informed_entity
            .iter()
            .filter_map(|e| e.stop.clone())
            .collect();
        stop_ids.sort();
        stop_ids.dedup();
        Self {
            id: res.id,
            header: attrs.header,
            description: attrs.description,
            effect: attrs.effect,
            severity: attrs.severity,
            lifecycle: attrs.lifecycle,
            updated_at: parse_time(&attrs.updated_at),
            route_ids,
            stop_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TripAttributes {
    pub headsign: Option<String>,
    pub name: Option<String>,
    pub direction_id: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Trip {
    pub id: String,
    pub headsign: Option<String>,
    pub name: Option<String>,
    pub direction_id: Option<u8>,
    pub route_id: Option<String>,
    pub shape_id: Option<String>,
}

impl Trip {
    pub fn from_resource(res: Resource<TripAttributes>) -> Self {
        let route_id = res.relationship_id("route");
        let shape_id = res.relationship_id("shape");
        let attrs = res.attributes;
        Self {
            id: res.id,
            headsign: attrs.headsign,
            name: attrs.name,
            direction_id: attrs.direction_id,
            route_id,
            shape_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ShapeAttributes {
    pub polyline: Option<String>,
}

/// A route geometry, kept as the provider's encoded polyline.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Shape {
    pub id: String,
    /// The route this shape was fetched for
    pub route_id: String,
    pub polyline: Option<String>,
}

impl Shape {
    pub fn from_resource(res: Resource<ShapeAttributes>, route_id: &str) -> Self {
        Self {
            id: res.id,
            route_id: route_id.to_string(),
            polyline: res.attributes.polyline,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LiveFacilityAttributes {
    pub updated_at: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// Live facility state (elevators, parking counts). Passed through untyped.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LiveFacility {
    pub id: String,
    pub updated_at: Option<DateTime<Utc>>,
    #[schema(value_type = Object)]
    pub properties: serde_json::Value,
}

impl LiveFacility {
    pub fn from_resource(res: Resource<LiveFacilityAttributes>) -> Self {
        let attrs = res.attributes;
        Self {
            id: res.id,
            updated_at: parse_time(&attrs.updated_at),
            properties: attrs.properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::jsonapi::decode_document;

    #[test]
    fn test_parse_time_handles_offsets() {
        let t = parse_time(&Some("2026-01-05T12:02:00-05:00".to_string())).unwrap();
        assert_eq!(t.to_rfc3339(), "2026-01-05T17:02:00+00:00");
        assert!(parse_time(&Some("not a time".to_string())).is_none());
        assert!(parse_time(&None).is_none());
    }

    #[test]
    fn test_prediction_from_resource() {
        let body = r#"{
            "data": [{
                "id": "prediction-1",
                "type": "prediction",
                "attributes": {
                    "arrival_time": "2026-01-05T12:00:00Z",
                    "departure_time": "2026-01-05T12:02:00Z",
                    "direction_id": 1,
                    "stop_sequence": 5,
                    "status": "Delayed"
                },
                "relationships": {
                    "stop": {"data": {"id": "S1", "type": "stop"}},
                    "route": {"data": {"id": "Red", "type": "route"}},
                    "trip": {"data": {"id": "T1", "type": "trip"}}
                }
            }]
        }"#;
        let doc = decode_document::<PredictionAttributes>(body).unwrap();
        let prediction = Prediction::from_resource(doc.into_resources().pop().unwrap());

        assert_eq!(prediction.stop_id.as_deref(), Some("S1"));
        assert_eq!(prediction.trip_id.as_deref(), Some("T1"));
        assert_eq!(prediction.stop_sequence, Some(5));
        // departure wins over arrival
        assert_eq!(
            prediction.best_time().unwrap().to_rfc3339(),
            "2026-01-05T12:02:00+00:00"
        );
    }

    #[test]
    fn test_stop_from_resource_without_parent() {
        let body = r#"{
            "data": {
                "id": "platform-7",
                "type": "stop",
                "attributes": {
                    "name": "Central",
                    "latitude": 42.36,
                    "longitude": -71.09,
                    "location_type": 0,
                    "platform_name": null,
                    "municipality": null
                },
                "relationships": {"parent_station": {"data": null}}
            }
        }"#;
        let doc = decode_document::<StopAttributes>(body).unwrap();
        let stop = Stop::from_resource(doc.into_resources().pop().unwrap());
        assert!(stop.parent_station.is_none());
        assert_eq!(stop.location_type, Some(0));
    }

    #[test]
    fn test_alert_informed_entities_deduplicate() {
        let body = r#"{
            "data": [{
                "id": "a1",
                "type": "alert",
                "attributes": {
                    "header": "Shuttle buses",
                    "description": null,
                    "effect": "SHUTTLE",
                    "severity": 5,
                    "lifecycle": "ONGOING",
                    "updated_at": null,
                    "informed_entity": [
                        {"route": "Red", "stop": null},
                        {"route": "Red", "stop": "S1"},
                        {"route": null, "stop": "S1"}
                    ]
                }
            }]
        }"#;
        let doc = decode_document::<AlertAttributes>(body).unwrap();
        let alert = Alert::from_resource(doc.into_resources().pop().unwrap());
        assert_eq!(alert.route_ids, vec!["Red".to_string()]);
        assert_eq!(alert.stop_ids, vec!["S1".to_string()]);
    }
}
