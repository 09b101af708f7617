//! Adapters for the external expense backend: the HTTP client used in production and
//! in-memory implementations with fixture data for tests and offline runs.

pub mod fixtures;
pub mod http;
pub mod memory;

pub use http::{BackendError, HttpBackend};
pub use memory::{
    InMemoryBackend, InMemoryExpenseCodes, InMemoryOrgChart, InMemoryPerDiemRates,
    RecordingSubmitter, StaticHealth,
};
