//! Stop classification and platform-to-station resolution.
//!
//! Pure functions over the cached stop set; no I/O. A "boardable" stop is a
//! station or a platform, somewhere a rider can actually wait.

use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::models::Stop;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    Station,
    Platform,
    Entrance,
    Other,
}

impl StopKind {
    pub fn is_boardable(self) -> bool {
        matches!(self, StopKind::Station | StopKind::Platform)
    }
}

/// Classify a stop from its provider location-type code.
pub fn classify(stop: &Stop) -> StopKind {
    match stop.location_type.unwrap_or(0) {
        1 => StopKind::Station,
        2 => StopKind::Entrance,
        0 | 4 => StopKind::Platform,
        _ => StopKind::Other,
    }
}

/// Resolve the boardable stop a rider would actually be sent to.
///
/// Stations and platforms stand for themselves; in particular a platform with
/// a missing or unresolvable parent is still boardable on its own. Everything
/// else (entrances, generic nodes) resolves through its parent station, or to
/// nothing when no usable parent exists.
pub fn resolve_boardable_parent<'a>(
    stop: &'a Stop,
    stop_index: &'a HashMap<String, Stop>,
) -> Option<&'a Stop> {
    if classify(stop).is_boardable() {
        return Some(stop);
    }
    let parent_id = stop.parent_station.as_ref()?;
    let parent = stop_index.get(parent_id)?;
    if classify(parent).is_boardable() {
        Some(parent)
    } else {
        None
    }
}

/// Resolve the station-level stop a stop rolls up to for rider-facing
/// display.
///
/// A platform with a station parent yields that parent; a platform with no
/// usable parent stands alone as its own boardable unit. Entrances resolve
/// through their parent first. Returns `None` only for stops that are not
/// boardable at all.
pub fn canonical_station<'a>(
    stop: &'a Stop,
    stop_index: &'a HashMap<String, Stop>,
) -> Option<&'a Stop> {
    let boardable = resolve_boardable_parent(stop, stop_index)?;
    if classify(boardable) == StopKind::Platform {
        if let Some(parent_id) = &boardable.parent_station {
            if let Some(parent) = stop_index.get(parent_id) {
                if classify(parent) == StopKind::Station {
                    return Some(parent);
                }
            }
        }
    }
    Some(boardable)
}
