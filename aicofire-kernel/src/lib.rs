//! AICO Fire kernel : ingestion des trames capteurs, état dérivé, alertes.
//!
//! Le binaire (`main.rs`) assemble ces modules ; le devkit et les tests
//! les utilisent directement.

pub mod alerts;
pub mod anomaly;
pub mod config;
pub mod events;
pub mod frame;
pub mod health;
pub mod http;
pub mod models;
pub mod mqtt;
pub mod pipeline;
pub mod simulator;
pub mod state;
pub mod supervisor;

pub use events::{LoggingObserver, ObserverRegistry, SubscriptionId, TelemetryEvent, TelemetryObserver};
pub use models::{SensorCatalog, SensorId, SensorStatus, Trend};
pub use pipeline::{IngestReport, TelemetryPipeline};
pub use state::{DeviceInfo, TelemetryError};
pub use supervisor::ConnectionStatus;
