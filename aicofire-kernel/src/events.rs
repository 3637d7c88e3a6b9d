/**
 * EVENTS - Interface d'observation pour les couches de rendu
 *
 * RÔLE :
 * Le kernel ne rend rien lui-même ; les collaborateurs (dashboard, API, logs)
 * s'abonnent ici pour recevoir les changements d'état.
 *
 * FONCTIONNEMENT :
 * - TelemetryObserver = trait commun, toutes les méthodes ont un défaut vide
 * - ObserverRegistry = catalogue des abonnés, subscribe -> SubscriptionId
 * - dispatch hors du verrou de la store (voir pipeline.rs)
 */

use crate::alerts::Alert;
use crate::health::DeviceHealth;
use crate::models::SensorId;
use crate::state::SensorState;
use crate::supervisor::ConnectionStatus;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub type SubscriptionId = Uuid;

pub trait TelemetryObserver: Send + Sync {
    fn on_sensor_changed(&self, _device_id: &str, _sensor_id: SensorId, _state: &SensorState) {}

    fn on_device_health_changed(&self, _device_id: &str, _health: &DeviceHealth) {}

    fn on_alert(&self, _alert: &Alert) {}

    fn on_connection_status(&self, _status: ConnectionStatus) {}
}

/// Événement collecté sous verrou puis diffusé après relâchement.
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    SensorChanged { device_id: String, sensor_id: SensorId, state: SensorState },
    DeviceHealthChanged { device_id: String, health: DeviceHealth },
    Alert(Alert),
    ConnectionStatus(ConnectionStatus),
}

#[derive(Default, Clone)]
pub struct ObserverRegistry {
    observers: Arc<RwLock<HashMap<SubscriptionId, Arc<dyn TelemetryObserver>>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn TelemetryObserver>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.observers.write().insert(id, observer);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.write().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn dispatch(&self, events: &[TelemetryEvent]) {
        if events.is_empty() {
            return;
        }
        // copie de la liste : un observer peut (se dés)abonner pendant le dispatch
        let observers: Vec<Arc<dyn TelemetryObserver>> = self.observers.read().values().cloned().collect();
        for event in events {
            for observer in &observers {
                match event {
                    TelemetryEvent::SensorChanged { device_id, sensor_id, state } => {
                        observer.on_sensor_changed(device_id, *sensor_id, state)
                    }
                    TelemetryEvent::DeviceHealthChanged { device_id, health } => {
                        observer.on_device_health_changed(device_id, health)
                    }
                    TelemetryEvent::Alert(alert) => observer.on_alert(alert),
                    TelemetryEvent::ConnectionStatus(status) => observer.on_connection_status(*status),
                }
            }
        }
    }
}

/// Observer qui journalise alertes et changements de connexion.
pub struct LoggingObserver;

impl TelemetryObserver for LoggingObserver {
    fn on_device_health_changed(&self, device_id: &str, health: &DeviceHealth) {
        tracing::debug!(device_id, score = health.health_score, status = ?health.overall_status, "device health");
    }

    fn on_alert(&self, alert: &Alert) {
        tracing::warn!(device_id = %alert.device_id, sensor = %alert.sensor_id, severity = ?alert.severity, "{}", alert.message);
    }

    fn on_connection_status(&self, status: ConnectionStatus) {
        tracing::info!(?status, "connection status changed");
    }
}
