/**
 * SENSOR STATE STORE - État courant par appareil et par capteur
 *
 * RÔLE :
 * Registre des appareils surveillés et, pour chacun, de ses capteurs :
 * valeur courante, historique borné, statut, tendance, dernier horodatage.
 *
 * FONCTIONNEMENT :
 * - apply_update : append historique (FIFO) -> tendance -> statut seuils
 *   -> priorité anomalie firmware -> valeur + horodatage
 * - le statut est toujours recalculé, jamais muté indépendamment
 * - appareil inconnu = TelemetryError::UnknownDevice (sauf auto_register)
 *
 * CONCURRENCE : la store n'a pas de verrou propre ; le pipeline la place
 * derrière un Shared<T> pour sérialiser les mises à jour.
 */

use crate::anomaly::AnomalySet;
use crate::frame::FrameError;
use crate::models::{SensorCatalog, SensorId, SensorReadings, SensorStatus, Trend};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use time::OffsetDateTime;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("device already registered: {0}")]
    DeviceAlreadyRegistered(String),
    #[error("invalid thresholds for {sensor}: warning {warning} > critical {critical}")]
    InvalidThresholds { sensor: SensorId, warning: f64, critical: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidFieldPolicy {
    /// Valeur illisible = 0 (comportement historique des dashboards)
    #[default]
    Zero,
    /// Le capteur garde sa dernière valeur pour cette trame
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub history_capacity: usize,
    pub trend_window: usize,
    /// Variation relative (sur la moyenne de la fenêtre) au-delà de laquelle on sort de `stable`
    pub trend_ratio: f64,
    pub auto_register: bool,
    pub invalid_field_policy: InvalidFieldPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: 60,
            trend_window: 5,
            trend_ratio: 0.05,
            auto_register: false,
            invalid_field_policy: InvalidFieldPolicy::Zero,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    pub current: f64,
    pub history: VecDeque<f64>,
    pub status: SensorStatus,
    pub trend: Trend,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
}

impl SensorState {
    fn new(capacity: usize) -> Self {
        Self {
            current: 0.0,
            history: VecDeque::with_capacity(capacity),
            status: SensorStatus::Normal,
            trend: Trend::Stable,
            last_update: None,
        }
    }

    /// min / max / moyenne sur l'historique retenu.
    pub fn stats(&self) -> Option<SensorStats> {
        if self.history.is_empty() {
            return None;
        }
        let min = self.history.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let average = self.history.iter().sum::<f64>() / self.history.len() as f64;
        Some(SensorStats { min, max, average, samples: self.history.len() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorStats {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Sous-ensemble de capteurs ; absent = les 12 canaux
    #[serde(default)]
    pub sensors: Option<Vec<SensorId>>,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub info: DeviceInfo,
    pub sensors: BTreeMap<SensorId, SensorState>,
    pub health_score: f64,
    pub overall_status: SensorStatus,
    /// Santé rapportée par le firmware (champ 15 de la trame)
    pub panel_health: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
}

impl DeviceState {
    fn new(info: DeviceInfo, capacity: usize) -> Self {
        let ids: BTreeSet<SensorId> = match &info.sensors {
            Some(list) => list.iter().copied().collect(),
            None => SensorId::ALL.into_iter().collect(),
        };
        Self {
            info,
            sensors: ids.into_iter().map(|id| (id, SensorState::new(capacity))).collect(),
            health_score: 100.0,
            overall_status: SensorStatus::Normal,
            panel_health: None,
            last_message_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }
}

/// Changement produit par une mise à jour, consommé par l'agrégation et les alertes.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorChange {
    pub sensor_id: SensorId,
    pub state: SensorState,
}

/// Tendance sur les `window` derniers points : (dernier - premier) comparé à `ratio` x |moyenne|.
pub fn compute_trend(history: &VecDeque<f64>, window: usize, ratio: f64) -> Trend {
    if window < 2 || history.len() < window {
        return Trend::Stable;
    }
    let recent: Vec<f64> = history.iter().skip(history.len() - window).copied().collect();
    let average = recent.iter().sum::<f64>() / recent.len() as f64;
    let diff = recent[recent.len() - 1] - recent[0];
    let threshold = ratio * average.abs();
    if diff > threshold {
        Trend::Rising
    } else if diff < -threshold {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

pub struct TelemetryStore {
    config: StoreConfig,
    catalog: SensorCatalog,
    devices: BTreeMap<String, DeviceState>,
}

impl TelemetryStore {
    pub fn new(config: StoreConfig, catalog: SensorCatalog) -> Self {
        Self { config, catalog, devices: BTreeMap::new() }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SensorCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut SensorCatalog {
        &mut self.catalog
    }

    /// Enregistre un appareil ; tous ses capteurs partent à 0 / normal / historique vide.
    pub fn register_device(&mut self, info: DeviceInfo) -> Result<&DeviceState, TelemetryError> {
        if self.devices.contains_key(&info.id) {
            return Err(TelemetryError::DeviceAlreadyRegistered(info.id));
        }
        let id = info.id.clone();
        let device = DeviceState::new(info, self.config.history_capacity);
        Ok(self.devices.entry(id).or_insert(device))
    }

    pub fn remove_device(&mut self, device_id: &str) -> Result<DeviceState, TelemetryError> {
        self.devices
            .remove(device_id)
            .ok_or_else(|| TelemetryError::UnknownDevice(device_id.to_string()))
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceState> {
        self.devices.get(device_id)
    }

    pub(crate) fn device_mut(&mut self, device_id: &str) -> Option<&mut DeviceState> {
        self.devices.get_mut(device_id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceState> {
        self.devices.values()
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    pub fn get_sensor(&self, device_id: &str, sensor_id: SensorId) -> Result<Option<&SensorState>, TelemetryError> {
        let device = self
            .devices
            .get(device_id)
            .ok_or_else(|| TelemetryError::UnknownDevice(device_id.to_string()))?;
        Ok(device.sensors.get(&sensor_id))
    }

    pub fn get_all_sensors(&self, device_id: &str) -> Result<&BTreeMap<SensorId, SensorState>, TelemetryError> {
        self.devices
            .get(device_id)
            .map(|d| &d.sensors)
            .ok_or_else(|| TelemetryError::UnknownDevice(device_id.to_string()))
    }

    /// Applique une trame décodée à un appareil. Les capteurs non rattachés sont ignorés.
    pub fn apply_update(
        &mut self,
        device_id: &str,
        readings: &SensorReadings,
        anomalies: &AnomalySet,
        timestamp: OffsetDateTime,
    ) -> Result<Vec<SensorChange>, TelemetryError> {
        if !self.devices.contains_key(device_id) {
            if !self.config.auto_register {
                return Err(TelemetryError::UnknownDevice(device_id.to_string()));
            }
            tracing::info!(device_id, "auto-registering device");
            self.register_device(DeviceInfo::new(device_id))?;
        }

        let capacity = self.config.history_capacity.max(1);
        let (window, ratio) = (self.config.trend_window, self.config.trend_ratio);
        let catalog = &self.catalog;
        let Some(device) = self.devices.get_mut(device_id) else {
            return Err(TelemetryError::UnknownDevice(device_id.to_string()));
        };

        let mut changes = Vec::with_capacity(readings.len());
        for reading in readings.at(timestamp) {
            let Some(sensor) = device.sensors.get_mut(&reading.sensor_id) else {
                continue;
            };

            sensor.history.push_back(reading.value);
            while sensor.history.len() > capacity {
                sensor.history.pop_front();
            }
            sensor.trend = compute_trend(&sensor.history, window, ratio);

            let threshold_status = catalog.get(reading.sensor_id).classify(reading.value);
            sensor.status = if anomalies.contains(&reading.sensor_id) {
                SensorStatus::Critical
            } else {
                threshold_status
            };
            sensor.current = reading.value;
            sensor.last_update = Some(reading.timestamp);

            changes.push(SensorChange { sensor_id: reading.sensor_id, state: sensor.clone() });
        }
        device.last_message_at = Some(timestamp);
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn store() -> TelemetryStore {
        let mut store = TelemetryStore::new(StoreConfig::default(), SensorCatalog::default());
        store.register_device(DeviceInfo::new("device-1")).unwrap();
        store
    }

    fn one(sensor: SensorId, value: f64) -> SensorReadings {
        let mut r = SensorReadings::new();
        r.insert(sensor, value);
        r
    }

    const T0: OffsetDateTime = datetime!(2026-01-01 12:00 UTC);

    #[test]
    fn test_register_initializes_all_sensors() {
        let store = store();
        let sensors = store.get_all_sensors("device-1").unwrap();
        assert_eq!(sensors.len(), 12);
        let co = &sensors[&SensorId::Co];
        assert_eq!(co.current, 0.0);
        assert_eq!(co.status, SensorStatus::Normal);
        assert!(co.history.is_empty());
        assert!(co.last_update.is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut store = store();
        assert!(matches!(
            store.register_device(DeviceInfo::new("device-1")),
            Err(TelemetryError::DeviceAlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_history_evicts_oldest_first() {
        let mut store = store();
        let capacity = store.config().history_capacity;
        let pushed: Vec<f64> = (0..capacity + 5).map(|i| i as f64).collect();
        for v in &pushed {
            store.apply_update("device-1", &one(SensorId::Gas, *v), &AnomalySet::new(), T0).unwrap();
        }
        let state = store.get_sensor("device-1", SensorId::Gas).unwrap().unwrap();
        assert_eq!(state.history.len(), capacity);
        let kept: Vec<f64> = state.history.iter().copied().collect();
        assert_eq!(kept, pushed[5..].to_vec());
    }

    #[test]
    fn test_critical_threshold_is_inclusive() {
        let mut store = store();
        let critical = store.catalog().get(SensorId::Co).critical_threshold;
        store.apply_update("device-1", &one(SensorId::Co, critical), &AnomalySet::new(), T0).unwrap();
        let state = store.get_sensor("device-1", SensorId::Co).unwrap().unwrap();
        assert_eq!(state.status, SensorStatus::Critical);
    }

    #[test]
    fn test_anomaly_overrides_threshold_status() {
        let mut store = store();
        let anomalies = AnomalySet::from([SensorId::Humidity]);
        store.apply_update("device-1", &one(SensorId::Humidity, 10.0), &anomalies, T0).unwrap();
        let state = store.get_sensor("device-1", SensorId::Humidity).unwrap().unwrap();
        assert_eq!(state.status, SensorStatus::Critical);

        // l'anomalie ne vaut que pour la trame courante
        store.apply_update("device-1", &one(SensorId::Humidity, 10.0), &AnomalySet::new(), T0).unwrap();
        let state = store.get_sensor("device-1", SensorId::Humidity).unwrap().unwrap();
        assert_eq!(state.status, SensorStatus::Normal);
    }

    #[test]
    fn test_repeated_update_keeps_history_and_status() {
        let mut store = store();
        let readings = one(SensorId::Temperature, 40.0);
        let first = store.apply_update("device-1", &readings, &AnomalySet::new(), T0).unwrap();
        let second = store.apply_update("device-1", &readings, &AnomalySet::new(), T0).unwrap();
        assert_eq!(first[0].state.status, SensorStatus::Warning);
        assert_eq!(second[0].state.status, first[0].state.status);
        assert_eq!(second[0].state.history.len(), 2);
        assert_eq!(second[0].state.trend, Trend::Stable);
    }

    #[test]
    fn test_trend_needs_full_window() {
        let history: VecDeque<f64> = VecDeque::from(vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(compute_trend(&history, 5, 0.05), Trend::Stable);

        let rising: VecDeque<f64> = VecDeque::from(vec![10.0, 11.0, 12.0, 13.0, 14.0]);
        assert_eq!(compute_trend(&rising, 5, 0.05), Trend::Rising);

        let falling: VecDeque<f64> = rising.iter().rev().copied().collect();
        assert_eq!(compute_trend(&falling, 5, 0.05), Trend::Falling);

        // 2% de variation sur une moyenne de 100 : sous le seuil de 5%
        let flat: VecDeque<f64> = VecDeque::from(vec![99.0, 100.0, 100.0, 100.0, 101.0]);
        assert_eq!(compute_trend(&flat, 5, 0.05), Trend::Stable);

        // moyenne négative : seuil sur |moyenne|, une série plate reste stable
        let negative_flat: VecDeque<f64> = VecDeque::from(vec![-10.0; 5]);
        assert_eq!(compute_trend(&negative_flat, 5, 0.05), Trend::Stable);
        let negative_rising: VecDeque<f64> = VecDeque::from(vec![-12.0, -11.0, -10.0, -9.0, -8.0]);
        assert_eq!(compute_trend(&negative_rising, 5, 0.05), Trend::Rising);
        let negative_falling: VecDeque<f64> = negative_rising.iter().rev().copied().collect();
        assert_eq!(compute_trend(&negative_falling, 5, 0.05), Trend::Falling);
    }

    #[test]
    fn test_unknown_device_is_an_error() {
        let mut store = store();
        let err = store
            .apply_update("ghost", &one(SensorId::Co, 1.0), &AnomalySet::new(), T0)
            .unwrap_err();
        assert!(matches!(err, TelemetryError::UnknownDevice(id) if id == "ghost"));
        assert!(store.device("ghost").is_none());
    }

    #[test]
    fn test_auto_register_creates_device() {
        let config = StoreConfig { auto_register: true, ..StoreConfig::default() };
        let mut store = TelemetryStore::new(config, SensorCatalog::default());
        store.apply_update("panel-7", &one(SensorId::Co, 1.0), &AnomalySet::new(), T0).unwrap();
        assert_eq!(store.device("panel-7").unwrap().last_message_at, Some(T0));
    }

    #[test]
    fn test_sensors_outside_device_profile_are_ignored() {
        let mut store = TelemetryStore::new(StoreConfig::default(), SensorCatalog::default());
        let info = DeviceInfo { sensors: Some(vec![SensorId::Co, SensorId::Temperature]), ..DeviceInfo::new("mini") };
        store.register_device(info).unwrap();

        let mut readings = one(SensorId::Co, 3.0);
        readings.insert(SensorId::Pressure, 1013.0);
        let changes = store.apply_update("mini", &readings, &AnomalySet::new(), T0).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(store.get_sensor("mini", SensorId::Pressure).unwrap().is_none());
    }

    #[test]
    fn test_stats_over_history() {
        let mut store = store();
        for v in [2.0, 4.0, 6.0] {
            store.apply_update("device-1", &one(SensorId::Current, v), &AnomalySet::new(), T0).unwrap();
        }
        let stats = store.get_sensor("device-1", SensorId::Current).unwrap().unwrap().stats().unwrap();
        assert_eq!((stats.min, stats.max, stats.average, stats.samples), (2.0, 6.0, 4.0, 3));
    }

    #[test]
    fn test_remove_device() {
        let mut store = store();
        assert!(store.remove_device("device-1").is_ok());
        assert!(matches!(store.remove_device("device-1"), Err(TelemetryError::UnknownDevice(_))));
    }
}
