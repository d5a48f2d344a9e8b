//! Shared state of the controlled bulbs.

pub mod registry;

pub use registry::{BulbLink, BulbRecord, BulbRegistry, ConnectionState, PowerReport, SharedRegistry};
