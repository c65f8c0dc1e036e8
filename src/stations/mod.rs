//! Station topology and rider-facing aggregation.

pub mod aggregate;
pub mod topology;

pub use aggregate::{
    AggregateError, AggregationService, HomeSnapshotResponse, StationBoardResponse, StationEntry,
};
pub use topology::{canonical_station, classify, resolve_boardable_parent, StopKind};
