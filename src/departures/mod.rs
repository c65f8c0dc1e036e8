//! The ETA engine: schedule/prediction blending and stop snapshots.

pub mod blend;
pub mod snapshot;

pub use blend::{
    derive_status, fetch_blended_departures, BlendOptions, BlendedDeparture, DepartureStatus,
    EtaSource,
};
pub use snapshot::{
    cached_stop_eta_snapshot, stop_eta_snapshot, SnapshotOrigin, StopEtaSnapshot,
};
