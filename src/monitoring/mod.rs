//! Tag tracking: state store, geofence and offline evaluators, the ingestion
//! monitor and the async service that drives it

pub mod geofence;
pub mod monitor;
pub mod offline;
pub mod service;
pub mod store;

pub use geofence::{BreachPolicy, Geofence, GeofenceEvaluator, GeofenceTransition};
pub use monitor::{IngestOutcome, Monitor, MonitorStats, StatsSnapshot};
pub use offline::{OfflineEvaluator, StaleReport};
pub use service::{Inbound, ServiceHandle};
pub use store::TagStateStore;
