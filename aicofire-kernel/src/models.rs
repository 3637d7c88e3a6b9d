/**
 * MODELS - Types partagés de la télémétrie incendie
 *
 * RÔLE :
 * Identifiants des 12 canaux capteurs, statuts, tendances et catalogue statique
 * des définitions (unité, seuils, plage d'affichage).
 *
 * FONCTIONNEMENT :
 * - SensorId = énumération fermée, ordre canonique = ordre des champs de la trame
 * - SensorCatalog = définitions chargées au démarrage, seuils remplaçables en bloc
 * - SensorReadings = enregistrement sensorId -> valeur d'une trame décodée
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Canal capteur. L'ordre des variantes suit l'ordre des champs 1..=12 de la trame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SensorId {
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "humidity")]
    Humidity,
    #[serde(rename = "gas")]
    Gas,
    #[serde(rename = "air-quality")]
    AirQuality,
    #[serde(rename = "no2")]
    No2,
    #[serde(rename = "co")]
    Co,
    #[serde(rename = "tvoc")]
    Tvoc,
    #[serde(rename = "eco2")]
    Eco2,
    #[serde(rename = "surface-temp")]
    SurfaceTemp,
    #[serde(rename = "surface-temp-2")]
    SurfaceTemp2,
    #[serde(rename = "pressure")]
    Pressure,
    #[serde(rename = "current")]
    Current,
}

impl SensorId {
    pub const ALL: [SensorId; 12] = [
        SensorId::Temperature,
        SensorId::Humidity,
        SensorId::Gas,
        SensorId::AirQuality,
        SensorId::No2,
        SensorId::Co,
        SensorId::Tvoc,
        SensorId::Eco2,
        SensorId::SurfaceTemp,
        SensorId::SurfaceTemp2,
        SensorId::Pressure,
        SensorId::Current,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorId::Temperature => "temperature",
            SensorId::Humidity => "humidity",
            SensorId::Gas => "gas",
            SensorId::AirQuality => "air-quality",
            SensorId::No2 => "no2",
            SensorId::Co => "co",
            SensorId::Tvoc => "tvoc",
            SensorId::Eco2 => "eco2",
            SensorId::SurfaceTemp => "surface-temp",
            SensorId::SurfaceTemp2 => "surface-temp-2",
            SensorId::Pressure => "pressure",
            SensorId::Current => "current",
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown sensor id: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Normal,
    Warning,
    Critical,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

/// Un échantillon pour un capteur à un instant donné.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub value: f64,
    pub timestamp: OffsetDateTime,
}

/// Valeurs d'une trame, indexées par capteur.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorReadings(BTreeMap<SensorId, f64>);

impl SensorReadings {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, sensor_id: SensorId, value: f64) {
        self.0.insert(sensor_id, value);
    }

    pub fn get(&self, sensor_id: SensorId) -> Option<f64> {
        self.0.get(&sensor_id).copied()
    }

    pub fn remove(&mut self, sensor_id: SensorId) -> Option<f64> {
        self.0.remove(&sensor_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Horodate chaque valeur pour produire des SensorReading.
    pub fn at(&self, timestamp: OffsetDateTime) -> impl Iterator<Item = SensorReading> + '_ {
        self.0.iter().map(move |(&sensor_id, &value)| SensorReading { sensor_id, value, timestamp })
    }
}

/// Définition statique d'un canal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDefinition {
    pub sensor_id: SensorId,
    pub label: &'static str,
    pub unit: &'static str,
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub display_min: f64,
    pub display_max: f64,
}

impl SensorDefinition {
    /// Statut dérivé des seuils, bornes inclusives.
    pub fn classify(&self, value: f64) -> SensorStatus {
        if value >= self.critical_threshold {
            SensorStatus::Critical
        } else if value >= self.warning_threshold {
            SensorStatus::Warning
        } else {
            SensorStatus::Normal
        }
    }
}

fn def(
    sensor_id: SensorId,
    label: &'static str,
    unit: &'static str,
    warning_threshold: f64,
    critical_threshold: f64,
    display_min: f64,
    display_max: f64,
) -> SensorDefinition {
    SensorDefinition { sensor_id, label, unit, warning_threshold, critical_threshold, display_min, display_max }
}

/// Catalogue des définitions, une entrée par canal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorCatalog {
    definitions: BTreeMap<SensorId, SensorDefinition>,
}

impl SensorCatalog {
    pub fn get(&self, sensor_id: SensorId) -> &SensorDefinition {
        // le catalogue est construit avec les 12 canaux, jamais retirés
        &self.definitions[&sensor_id]
    }

    pub fn definitions(&self) -> impl Iterator<Item = &SensorDefinition> {
        self.definitions.values()
    }

    /// Remplace les seuils d'un canal. Refuse warning > critical.
    pub fn set_thresholds(&mut self, sensor_id: SensorId, warning: f64, critical: f64) -> Result<(), crate::state::TelemetryError> {
        if !warning.is_finite() || !critical.is_finite() || warning > critical {
            return Err(crate::state::TelemetryError::InvalidThresholds { sensor: sensor_id, warning, critical });
        }
        let current = self.get(sensor_id).clone();
        self.definitions.insert(
            sensor_id,
            SensorDefinition { warning_threshold: warning, critical_threshold: critical, ..current },
        );
        Ok(())
    }
}

impl Default for SensorCatalog {
    fn default() -> Self {
        use SensorId::*;
        let defs = [
            def(Temperature, "Temperature", "°C", 35.0, 45.0, 15.0, 60.0),
            def(Humidity, "Humidity", "%", 70.0, 85.0, 20.0, 85.0),
            def(Gas, "Gas Resistance", "Ω", 300.0, 500.0, 50.0, 800.0),
            def(AirQuality, "Air Quality", "AQI", 50.0, 100.0, 0.0, 200.0),
            def(No2, "NO2", "ppb", 50.0, 100.0, 0.0, 200.0),
            def(Co, "Carbon Monoxide", "ppm", 25.0, 50.0, 0.0, 100.0),
            def(Tvoc, "TVOC", "ppb", 660.0, 2200.0, 0.0, 2000.0),
            def(Eco2, "eCO2", "ppm", 1000.0, 2000.0, 400.0, 5000.0),
            def(SurfaceTemp, "Surface Temp", "°C", 60.0, 80.0, 18.0, 90.0),
            def(SurfaceTemp2, "Surface Temp 2", "°C", 60.0, 80.0, 18.0, 90.0),
            def(Pressure, "Pressure", "hPa", 1050.0, 1080.0, 900.0, 1100.0),
            def(Current, "Current", "A", 5.0, 8.0, 0.0, 10.0),
        ];
        Self { definitions: defs.into_iter().map(|d| (d.sensor_id, d)).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_id_names_roundtrip() {
        for id in SensorId::ALL {
            assert_eq!(id.as_str().parse::<SensorId>().unwrap(), id);
        }
        assert!("smoke".parse::<SensorId>().is_err());
        assert_eq!(serde_json::to_string(&SensorId::SurfaceTemp2).unwrap(), "\"surface-temp-2\"");
    }

    #[test]
    fn test_classify_boundaries_are_inclusive() {
        let catalog = SensorCatalog::default();
        let co = catalog.get(SensorId::Co);
        assert_eq!(co.classify(24.9), SensorStatus::Normal);
        assert_eq!(co.classify(25.0), SensorStatus::Warning);
        assert_eq!(co.classify(50.0), SensorStatus::Critical);
    }

    #[test]
    fn test_set_thresholds_validates_order() {
        let mut catalog = SensorCatalog::default();
        catalog.set_thresholds(SensorId::Temperature, 60.0, 80.0).unwrap();
        assert_eq!(catalog.get(SensorId::Temperature).critical_threshold, 80.0);
        assert_eq!(catalog.get(SensorId::Temperature).unit, "°C");
        assert!(catalog.set_thresholds(SensorId::Temperature, 90.0, 80.0).is_err());
    }
}
