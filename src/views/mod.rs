//! Read-only projections over the resource cache. Grouping and counting
//! only; anything with real merge logic lives in `departures` and `stations`.

pub mod insights;
pub mod lines;
pub mod trips;
pub mod vehicles;
