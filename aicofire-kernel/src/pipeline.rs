/**
 * TELEMETRY PIPELINE - Chaîne trame -> état -> santé -> alertes -> observers
 *
 * RÔLE :
 * Point d'entrée unique des trames, qu'elles viennent du broker MQTT ou du
 * simulateur de démo. Porte la store, le gestionnaire d'alertes et le statut
 * de connexion derrière un seul verrou.
 *
 * FONCTIONNEMENT :
 * 1. parse (hors verrou) -> MalformedFrame = log + drop, store inchangée
 * 2. décodage des masques
 * 3. sous verrou : apply_update -> panel_health -> recompute santé -> alertes
 * 4. verrou relâché, puis dispatch des événements collectés
 *
 * Deux mises à jour ne s'entrelacent jamais : le verrou couvre l'étape 3 entière.
 */

use crate::alerts::{Alert, AlertConfig, AlertCounts, AlertManager, AlertSeverity};
use crate::anomaly;
use crate::events::{ObserverRegistry, SubscriptionId, TelemetryEvent, TelemetryObserver};
use crate::frame::{self, FrameLayout};
use crate::health::{self, DeviceHealth};
use crate::models::{SensorCatalog, SensorDefinition, SensorId, SensorStatus};
use crate::state::{new_state, DeviceInfo, DeviceState, InvalidFieldPolicy, SensorState, Shared, StoreConfig, TelemetryError, TelemetryStore};
use crate::supervisor::ConnectionStatus;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

struct Inner {
    store: TelemetryStore,
    alerts: AlertManager,
    connection: ConnectionStatus,
}

/// Bilan d'une trame ingérée.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub device_id: String,
    pub updated: usize,
    pub health: DeviceHealth,
    pub alerts: Vec<Alert>,
    pub defaulted: Vec<SensorId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    pub status: SensorStatus,
    pub connection: ConnectionStatus,
    pub devices: usize,
    pub average_health: f64,
    pub alerts: AlertCounts,
}

#[derive(Clone)]
pub struct TelemetryPipeline {
    inner: Shared<Inner>,
    observers: ObserverRegistry,
    layout: FrameLayout,
}

impl TelemetryPipeline {
    pub fn new(store: StoreConfig, catalog: SensorCatalog, alerts: &AlertConfig, layout: FrameLayout) -> Self {
        Self {
            inner: new_state(Inner {
                store: TelemetryStore::new(store, catalog),
                alerts: AlertManager::new(alerts),
                connection: ConnectionStatus::Disconnected,
            }),
            observers: ObserverRegistry::new(),
            layout,
        }
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn subscribe(&self, observer: Arc<dyn TelemetryObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Entrée transport : les erreurs sont journalisées puis la trame est abandonnée.
    pub fn on_message(&self, device_id: &str, raw: &str) -> Option<IngestReport> {
        match self.ingest(device_id, raw) {
            Ok(report) => Some(report),
            Err(TelemetryError::Frame(e)) => {
                tracing::warn!(device_id, error = %e, "frame dropped");
                None
            }
            Err(e) => {
                tracing::warn!(device_id, error = %e, "update rejected");
                None
            }
        }
    }

    pub fn ingest(&self, device_id: &str, raw: &str) -> Result<IngestReport, TelemetryError> {
        self.ingest_at(device_id, raw, OffsetDateTime::now_utc())
    }

    pub fn ingest_at(&self, device_id: &str, raw: &str, now: OffsetDateTime) -> Result<IngestReport, TelemetryError> {
        let mut parsed = frame::parse(raw, self.layout)?;
        let anomalies = anomaly::decode(&parsed.mask1_hex, &parsed.mask2_hex);

        if !parsed.defaulted.is_empty() {
            tracing::warn!(device_id, fields = ?parsed.defaulted, "unparsable fields defaulted");
        }

        let mut events = Vec::new();
        let report = {
            let mut guard = self.inner.lock();
            let Inner { store, alerts, .. } = &mut *guard;

            let skip = store.config().invalid_field_policy == InvalidFieldPolicy::Skip;
            if skip {
                for sensor_id in &parsed.defaulted {
                    parsed.readings.remove(*sensor_id);
                }
            }

            let changes = store.apply_update(device_id, &parsed.readings, &anomalies, now)?;

            let Some(device) = store.device_mut(device_id) else {
                return Err(TelemetryError::UnknownDevice(device_id.to_string()));
            };
            if !(skip && parsed.panel_health_defaulted) {
                device.panel_health = Some(parsed.panel_health);
            }
            let device_health = health::recompute_device(device);

            let mut raised = Vec::new();
            for change in &changes {
                let definition = store.catalog().get(change.sensor_id);
                if let Some(alert) =
                    alerts.on_sensor_update(device_id, definition, change.state.status, change.state.current, now)
                {
                    raised.push(alert);
                }
            }

            events.extend(changes.iter().map(|c| TelemetryEvent::SensorChanged {
                device_id: device_id.to_string(),
                sensor_id: c.sensor_id,
                state: c.state.clone(),
            }));
            events.push(TelemetryEvent::DeviceHealthChanged { device_id: device_id.to_string(), health: device_health });
            events.extend(raised.iter().cloned().map(TelemetryEvent::Alert));

            IngestReport {
                device_id: device_id.to_string(),
                updated: changes.len(),
                health: device_health,
                alerts: raised,
                defaulted: std::mem::take(&mut parsed.defaulted),
            }
        };

        self.observers.dispatch(&events);
        Ok(report)
    }

    pub fn register_device(&self, info: DeviceInfo) -> Result<DeviceState, TelemetryError> {
        let device = self.inner.lock().store.register_device(info)?.clone();
        tracing::info!(device_id = %device.id(), sensors = device.sensors.len(), "device registered");
        Ok(device)
    }

    /// Retire l'appareil et ses alertes.
    pub fn remove_device(&self, device_id: &str) -> Result<DeviceState, TelemetryError> {
        let (removed, cleared) = {
            let mut guard = self.inner.lock();
            let removed = guard.store.remove_device(device_id)?;
            let cleared = guard.alerts.clear_device(device_id);
            (removed, cleared)
        };
        tracing::info!(device_id, alerts_cleared = cleared, "device removed");
        Ok(removed)
    }

    pub fn devices(&self) -> Vec<DeviceState> {
        self.inner.lock().store.devices().cloned().collect()
    }

    pub fn device(&self, device_id: &str) -> Option<DeviceState> {
        self.inner.lock().store.device(device_id).cloned()
    }

    pub fn sensor(&self, device_id: &str, sensor_id: SensorId) -> Result<Option<SensorState>, TelemetryError> {
        Ok(self.inner.lock().store.get_sensor(device_id, sensor_id)?.cloned())
    }

    pub fn catalog(&self) -> Vec<SensorDefinition> {
        self.inner.lock().store.catalog().definitions().cloned().collect()
    }

    /// Nouveaux seuils ; s'appliquent à partir de la prochaine trame.
    pub fn set_thresholds(&self, sensor_id: SensorId, warning: f64, critical: f64) -> Result<SensorDefinition, TelemetryError> {
        let mut guard = self.inner.lock();
        guard.store.catalog_mut().set_thresholds(sensor_id, warning, critical)?;
        let definition = guard.store.catalog().get(sensor_id).clone();
        drop(guard);
        tracing::info!(sensor = %sensor_id, warning, critical, "thresholds updated");
        Ok(definition)
    }

    pub fn alerts(&self, severity: Option<AlertSeverity>) -> Vec<Alert> {
        self.inner.lock().alerts.filtered(severity)
    }

    pub fn alert_counts(&self) -> AlertCounts {
        self.inner.lock().alerts.counts()
    }

    pub fn clear_alerts(&self) -> usize {
        let mut guard = self.inner.lock();
        let count = guard.alerts.len();
        guard.alerts.clear();
        count
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.lock().connection
    }

    /// Met à jour le statut de liaison. Une perte marque tous les appareils offline.
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        let mut events = Vec::new();
        {
            let mut guard = self.inner.lock();
            let previous = guard.connection;
            if previous == status {
                return;
            }
            guard.connection = status;
            events.push(TelemetryEvent::ConnectionStatus(status));

            let lost = previous == ConnectionStatus::Connected
                && matches!(status, ConnectionStatus::Disconnected | ConnectionStatus::Error);
            if lost {
                let store = &mut guard.store;
                for device_id in store.device_ids() {
                    if let Some(device) = store.device_mut(&device_id) {
                        device.overall_status = SensorStatus::Offline;
                        events.push(TelemetryEvent::DeviceHealthChanged {
                            device_id,
                            health: DeviceHealth { health_score: device.health_score, overall_status: SensorStatus::Offline },
                        });
                    }
                }
            }
        }
        self.observers.dispatch(&events);
    }

    pub fn system_summary(&self) -> SystemSummary {
        let guard = self.inner.lock();
        let devices: Vec<&DeviceState> = guard.store.devices().collect();
        let average_health = if devices.is_empty() {
            100.0
        } else {
            devices.iter().map(|d| d.health_score).sum::<f64>() / devices.len() as f64
        };
        SystemSummary {
            status: health::system_status(devices.iter().copied()),
            connection: guard.connection,
            devices: devices.len(),
            average_health,
            alerts: guard.alerts.counts(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trend;
    use parking_lot::Mutex;
    use time::macros::datetime;

    const SCENARIO: &str = "A;25.0;45.0;65.0;35.0;20.0;5.0;350.0;450.0;28.0;27.5;1013.0;2.5;00;00;95.0;B";
    const T0: OffsetDateTime = datetime!(2026-03-01 08:00 UTC);

    fn pipeline_with(store: StoreConfig) -> TelemetryPipeline {
        let p = TelemetryPipeline::new(store, SensorCatalog::default(), &AlertConfig::default(), FrameLayout::Standard);
        p.register_device(DeviceInfo::new("device-1")).unwrap();
        p
    }

    fn pipeline() -> TelemetryPipeline {
        pipeline_with(StoreConfig::default())
    }

    #[derive(Default)]
    struct Recorder {
        sensors: Mutex<usize>,
        health: Mutex<Vec<DeviceHealth>>,
        alerts: Mutex<Vec<Alert>>,
    }

    impl TelemetryObserver for Recorder {
        fn on_sensor_changed(&self, _device_id: &str, _sensor_id: SensorId, _state: &SensorState) {
            *self.sensors.lock() += 1;
        }
        fn on_device_health_changed(&self, _device_id: &str, health: &DeviceHealth) {
            self.health.lock().push(*health);
        }
        fn on_alert(&self, alert: &Alert) {
            self.alerts.lock().push(alert.clone());
        }
    }

    #[test]
    fn test_nominal_frame_scenario() {
        let p = pipeline();
        let report = p.ingest_at("device-1", SCENARIO, T0).unwrap();
        assert_eq!(report.updated, 12);
        assert_eq!(report.health.health_score, 100.0);
        assert_eq!(report.health.overall_status, SensorStatus::Normal);
        assert!(report.alerts.is_empty());

        let device = p.device("device-1").unwrap();
        assert_eq!(device.panel_health, Some(95.0));
        assert!(device.sensors.values().all(|s| s.status == SensorStatus::Normal));
        assert_eq!(device.last_message_at, Some(T0));
        assert!(p.alerts(None).is_empty());
    }

    #[test]
    fn test_malformed_frame_leaves_store_unchanged() {
        let p = pipeline();
        let before = p.device("device-1").unwrap();
        let err = p.ingest_at("device-1", "X;25.0;B", T0).unwrap_err();
        assert!(matches!(err, TelemetryError::Frame(_)));
        assert_eq!(p.device("device-1").unwrap(), before);
        assert!(p.on_message("device-1", "A;1;2;3").is_none());
    }

    #[test]
    fn test_anomaly_bit_raises_critical_alert() {
        let p = pipeline();
        // mask-1 bit 0 = temperature
        let raw = SCENARIO.replace(";00;00;", ";00;01;");
        let report = p.ingest_at("device-1", &raw, T0).unwrap();
        assert_eq!(report.health.overall_status, SensorStatus::Critical);
        assert_eq!(report.health.health_score, 92.0);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].sensor_id, SensorId::Temperature);
        assert_eq!(report.alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_alerts_suppressed_within_window() {
        let p = pipeline();
        let raw = SCENARIO.replacen(";5.0;", ";60.0;", 1);
        assert_eq!(p.ingest_at("device-1", &raw, T0).unwrap().alerts.len(), 1);
        assert!(p.ingest_at("device-1", &raw, T0 + time::Duration::seconds(5)).unwrap().alerts.is_empty());
        assert_eq!(p.ingest_at("device-1", &raw, T0 + time::Duration::seconds(31)).unwrap().alerts.len(), 1);
        assert_eq!(p.alert_counts().critical, 2);
        assert_eq!(p.clear_alerts(), 2);
    }

    #[test]
    fn test_unknown_device_rejected() {
        let p = pipeline();
        assert!(matches!(p.ingest_at("ghost", SCENARIO, T0), Err(TelemetryError::UnknownDevice(_))));
    }

    #[test]
    fn test_skip_policy_keeps_previous_value() {
        let p = pipeline_with(StoreConfig { invalid_field_policy: InvalidFieldPolicy::Skip, ..StoreConfig::default() });
        p.ingest_at("device-1", SCENARIO, T0).unwrap();
        let raw = SCENARIO.replacen("45.0", "??", 1);
        let report = p.ingest_at("device-1", &raw, T0).unwrap();
        assert_eq!(report.defaulted, vec![SensorId::Humidity]);
        assert_eq!(report.updated, 11);
        let humidity = p.sensor("device-1", SensorId::Humidity).unwrap().unwrap();
        assert_eq!(humidity.current, 45.0);
        assert_eq!(humidity.history.len(), 1);
    }

    #[test]
    fn test_trend_follows_successive_frames() {
        let p = pipeline();
        for temp in ["20.0", "21.0", "22.0", "23.0", "24.0"] {
            let raw = SCENARIO.replacen("25.0", temp, 1);
            p.ingest_at("device-1", &raw, T0).unwrap();
        }
        let temperature = p.sensor("device-1", SensorId::Temperature).unwrap().unwrap();
        assert_eq!(temperature.trend, Trend::Rising);
    }

    #[test]
    fn test_observers_notified_after_update() {
        let p = pipeline();
        let recorder = Arc::new(Recorder::default());
        let id = p.subscribe(recorder.clone());

        p.ingest_at("device-1", &SCENARIO.replacen(";5.0;", ";30.0;", 1), T0).unwrap();
        assert_eq!(*recorder.sensors.lock(), 12);
        assert_eq!(recorder.health.lock().len(), 1);
        assert_eq!(recorder.alerts.lock().len(), 1);
        assert_eq!(recorder.alerts.lock()[0].severity, AlertSeverity::Warning);

        assert!(p.unsubscribe(id));
        p.ingest_at("device-1", SCENARIO, T0).unwrap();
        assert_eq!(*recorder.sensors.lock(), 12);
    }

    #[test]
    fn test_connection_loss_marks_devices_offline() {
        let p = pipeline();
        p.ingest_at("device-1", SCENARIO, T0).unwrap();
        p.set_connection_status(ConnectionStatus::Connecting);
        p.set_connection_status(ConnectionStatus::Connected);
        assert_eq!(p.system_summary().status, SensorStatus::Normal);

        p.set_connection_status(ConnectionStatus::Disconnected);
        let device = p.device("device-1").unwrap();
        assert_eq!(device.overall_status, SensorStatus::Offline);
        assert_eq!(device.sensors[&SensorId::Co].current, 5.0);
        assert_eq!(p.system_summary().status, SensorStatus::Offline);

        // la trame suivante recalcule
        p.ingest_at("device-1", SCENARIO, T0).unwrap();
        assert_eq!(p.device("device-1").unwrap().overall_status, SensorStatus::Normal);
    }

    #[test]
    fn test_threshold_override_applies_to_next_frame() {
        let p = pipeline();
        assert!(p.set_thresholds(SensorId::Co, 10.0, 5.0).is_err());
        p.set_thresholds(SensorId::Co, 4.0, 5.0).unwrap();
        let report = p.ingest_at("device-1", SCENARIO, T0).unwrap();
        assert_eq!(report.health.overall_status, SensorStatus::Critical);
    }

    #[test]
    fn test_remove_device_clears_its_alerts() {
        let p = pipeline();
        p.ingest_at("device-1", &SCENARIO.replacen(";5.0;", ";60.0;", 1), T0).unwrap();
        assert_eq!(p.alerts(None).len(), 1);
        p.remove_device("device-1").unwrap();
        assert!(p.alerts(None).is_empty());
        assert!(p.devices().is_empty());
    }
}
