/**
 * ALERT MANAGER - Alertes dédupliquées sur dépassement de seuil
 *
 * RÔLE :
 * Convertit un statut warning/critical en alerte horodatée, plus récente en tête.
 *
 * FONCTIONNEMENT :
 * - statut normal/offline -> aucune alerte
 * - même (device, sensor) créé il y a moins de `suppression_window` -> supprimée
 * - au-delà de `capacity`, la plus ancienne est évincée
 * - pas d'expiration implicite ; clear() vide la liste
 */

use crate::models::{SensorDefinition, SensorId, SensorStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn from_status(status: SensorStatus) -> Option<Self> {
        match status {
            SensorStatus::Warning => Some(AlertSeverity::Warning),
            SensorStatus::Critical => Some(AlertSeverity::Critical),
            SensorStatus::Normal | SensorStatus::Offline => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub device_id: String,
    pub sensor_id: SensorId,
    pub severity: AlertSeverity,
    pub value: f64,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub suppression_window_secs: u64,
    pub capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { suppression_window_secs: 30, capacity: 50 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertCounts {
    pub warning: usize,
    pub critical: usize,
}

pub struct AlertManager {
    alerts: VecDeque<Alert>,
    suppression_window: Duration,
    capacity: usize,
}

impl AlertManager {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            alerts: VecDeque::with_capacity(config.capacity),
            suppression_window: Duration::seconds(i64::try_from(config.suppression_window_secs).unwrap_or(i64::MAX)),
            capacity: config.capacity.max(1),
        }
    }

    /// Retourne l'alerte créée, ou None si statut normal ou alerte supprimée.
    pub fn on_sensor_update(
        &mut self,
        device_id: &str,
        definition: &SensorDefinition,
        status: SensorStatus,
        value: f64,
        now: OffsetDateTime,
    ) -> Option<Alert> {
        let severity = AlertSeverity::from_status(status)?;
        let sensor_id = definition.sensor_id;

        let recent = self.alerts.iter().any(|a| {
            a.device_id == device_id && a.sensor_id == sensor_id && now - a.created_at < self.suppression_window
        });
        if recent {
            tracing::debug!(device_id, sensor = %sensor_id, "alert suppressed");
            return None;
        }

        let level = match severity {
            AlertSeverity::Critical => "critical level",
            AlertSeverity::Warning => "warning level",
        };
        let alert = Alert {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            sensor_id,
            severity,
            value,
            message: format!("{} at {level}: {value:.1}{}", definition.label, definition.unit),
            created_at: now,
        };

        self.alerts.push_front(alert.clone());
        self.alerts.truncate(self.capacity);
        Some(alert)
    }

    /// Plus récentes en premier.
    pub fn list(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn filtered(&self, severity: Option<AlertSeverity>) -> Vec<Alert> {
        self.alerts
            .iter()
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> AlertCounts {
        self.alerts.iter().fold(AlertCounts::default(), |mut acc, a| {
            match a.severity {
                AlertSeverity::Warning => acc.warning += 1,
                AlertSeverity::Critical => acc.critical += 1,
            }
            acc
        })
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }

    /// Retire les alertes d'un appareil supprimé.
    pub fn clear_device(&mut self, device_id: &str) -> usize {
        let before = self.alerts.len();
        self.alerts.retain(|a| a.device_id != device_id);
        before - self.alerts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorCatalog;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2026-01-01 12:00 UTC);

    fn manager() -> AlertManager {
        AlertManager::new(&AlertConfig::default())
    }

    fn breach(m: &mut AlertManager, device: &str, sensor: SensorId, at: OffsetDateTime) -> Option<Alert> {
        let catalog = SensorCatalog::default();
        m.on_sensor_update(device, catalog.get(sensor), SensorStatus::Critical, 60.0, at)
    }

    #[test]
    fn test_normal_status_never_alerts() {
        let mut m = manager();
        let co = SensorCatalog::default().get(SensorId::Co).clone();
        assert!(m.on_sensor_update("d", &co, SensorStatus::Normal, 1.0, T0).is_none());
        assert!(m.on_sensor_update("d", &co, SensorStatus::Offline, 1.0, T0).is_none());
        assert!(m.is_empty());
    }

    #[test]
    fn test_suppression_window() {
        let mut m = manager();
        let first = breach(&mut m, "d", SensorId::Co, T0).unwrap();
        assert_eq!(first.severity, AlertSeverity::Critical);
        assert_eq!(first.message, "Carbon Monoxide at critical level: 60.0ppm");

        assert!(breach(&mut m, "d", SensorId::Co, T0 + Duration::seconds(10)).is_none());
        assert_eq!(m.len(), 1);

        let third = breach(&mut m, "d", SensorId::Co, T0 + Duration::seconds(31)).unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(m.len(), 2);
        assert_eq!(m.list().next().unwrap().id, third.id);
    }

    #[test]
    fn test_huge_suppression_window_does_not_wrap() {
        let mut m = AlertManager::new(&AlertConfig { suppression_window_secs: u64::MAX, capacity: 50 });
        assert!(breach(&mut m, "d", SensorId::Co, T0).is_some());
        assert!(breach(&mut m, "d", SensorId::Co, T0 + Duration::days(365)).is_none());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_suppression_is_per_device_and_sensor() {
        let mut m = manager();
        assert!(breach(&mut m, "d1", SensorId::Co, T0).is_some());
        assert!(breach(&mut m, "d2", SensorId::Co, T0).is_some());
        assert!(breach(&mut m, "d1", SensorId::Tvoc, T0).is_some());
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut m = AlertManager::new(&AlertConfig { suppression_window_secs: 30, capacity: 3 });
        for (i, sensor) in [SensorId::Co, SensorId::No2, SensorId::Tvoc, SensorId::Eco2].into_iter().enumerate() {
            breach(&mut m, "d", sensor, T0 + Duration::seconds(i as i64));
        }
        let sensors: Vec<SensorId> = m.list().map(|a| a.sensor_id).collect();
        assert_eq!(sensors, vec![SensorId::Eco2, SensorId::Tvoc, SensorId::No2]);
    }

    #[test]
    fn test_filter_counts_and_clear() {
        let mut m = manager();
        breach(&mut m, "d1", SensorId::Co, T0);
        let humidity = SensorCatalog::default().get(SensorId::Humidity).clone();
        m.on_sensor_update("d1", &humidity, SensorStatus::Warning, 72.0, T0);
        breach(&mut m, "d2", SensorId::Co, T0);

        assert_eq!(m.counts(), AlertCounts { warning: 1, critical: 2 });
        assert_eq!(m.filtered(Some(AlertSeverity::Warning)).len(), 1);
        assert_eq!(m.filtered(None).len(), 3);

        assert_eq!(m.clear_device("d1"), 2);
        m.clear();
        assert!(m.is_empty());
    }
}
