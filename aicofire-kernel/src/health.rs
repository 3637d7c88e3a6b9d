//! Agrégation : score de santé et statut global, par appareil puis pour le système.
//!
//! Tout est recalculé depuis l'état courant des capteurs, jamais patché incrémentalement.

use crate::models::SensorStatus;
use crate::state::{DeviceState, SensorState};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceHealth {
    pub health_score: f64,
    pub overall_status: SensorStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub normal: usize,
    pub warning: usize,
    pub critical: usize,
    pub offline: usize,
}

impl StatusCounts {
    pub fn of(statuses: impl IntoIterator<Item = SensorStatus>) -> Self {
        let mut counts = StatusCounts::default();
        for status in statuses {
            match status {
                SensorStatus::Normal => counts.normal += 1,
                SensorStatus::Warning => counts.warning += 1,
                SensorStatus::Critical => counts.critical += 1,
                SensorStatus::Offline => counts.offline += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.normal + self.warning + self.critical + self.offline
    }
}

/// round(100 * (normal + 0.5 * warning) / total) ; un appareil sans capteur vaut 100.
pub fn health_score(counts: &StatusCounts) -> f64 {
    let total = counts.total();
    if total == 0 {
        return 100.0;
    }
    (100.0 * (counts.normal as f64 + 0.5 * counts.warning as f64) / total as f64).round()
}

/// critical > warning > offline > normal
pub fn worst_status(statuses: impl IntoIterator<Item = SensorStatus>) -> SensorStatus {
    statuses.into_iter().fold(SensorStatus::Normal, |worst, status| {
        if rank(status) > rank(worst) { status } else { worst }
    })
}

fn rank(status: SensorStatus) -> u8 {
    match status {
        SensorStatus::Normal => 0,
        SensorStatus::Offline => 1,
        SensorStatus::Warning => 2,
        SensorStatus::Critical => 3,
    }
}

pub fn compute_device_health<'a>(sensors: impl IntoIterator<Item = &'a SensorState> + Clone) -> DeviceHealth {
    let counts = StatusCounts::of(sensors.clone().into_iter().map(|s| s.status));
    DeviceHealth {
        health_score: health_score(&counts),
        overall_status: worst_status(sensors.into_iter().map(|s| s.status)),
    }
}

/// Recalcule et écrit la santé d'un appareil.
pub fn recompute_device(device: &mut DeviceState) -> DeviceHealth {
    let health = compute_device_health(device.sensors.values());
    device.health_score = health.health_score;
    device.overall_status = health.overall_status;
    health
}

pub fn system_status<'a>(devices: impl IntoIterator<Item = &'a DeviceState>) -> SensorStatus {
    worst_status(devices.into_iter().map(|d| d.overall_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(normal: usize, warning: usize, critical: usize) -> StatusCounts {
        StatusCounts { normal, warning, critical, offline: 0 }
    }

    #[test]
    fn test_health_score_weights_warnings_half() {
        assert_eq!(health_score(&counts(10, 2, 0)), 92.0);
        assert_eq!(health_score(&counts(12, 0, 0)), 100.0);
        assert_eq!(health_score(&counts(0, 0, 12)), 0.0);
        assert_eq!(health_score(&counts(6, 0, 6)), 50.0);
        assert_eq!(health_score(&StatusCounts::default()), 100.0);
    }

    #[test]
    fn test_worst_status_precedence() {
        use SensorStatus::*;
        assert_eq!(worst_status([Normal, Warning, Normal]), Warning);
        assert_eq!(worst_status([Warning, Critical, Offline]), Critical);
        assert_eq!(worst_status([Normal, Offline]), Offline);
        assert_eq!(worst_status(std::iter::empty()), Normal);
    }
}
