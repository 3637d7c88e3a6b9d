//! Décodage des masques d'anomalies calculés par le firmware.
//!
//! mask-1 : bits 0..7 -> temperature, humidity, gas, air-quality, no2, co, tvoc, eco2
//! mask-2 : bits 0..3 -> surface-temp, surface-temp-2, pressure, current (bits 4..7 inutilisés)

use crate::models::SensorId;
use std::collections::BTreeSet;

pub type AnomalySet = BTreeSet<SensorId>;

const MASK1_SENSORS: [Option<SensorId>; 8] = [
    Some(SensorId::Temperature),
    Some(SensorId::Humidity),
    Some(SensorId::Gas),
    Some(SensorId::AirQuality),
    Some(SensorId::No2),
    Some(SensorId::Co),
    Some(SensorId::Tvoc),
    Some(SensorId::Eco2),
];

const MASK2_SENSORS: [Option<SensorId>; 8] = [
    Some(SensorId::SurfaceTemp),
    Some(SensorId::SurfaceTemp2),
    Some(SensorId::Pressure),
    Some(SensorId::Current),
    None,
    None,
    None,
    None,
];

/// Octet non signé depuis une chaîne hex ; toute entrée invalide vaut 0.
pub fn hex_to_byte(hex: &str) -> u8 {
    let digits = hex.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    u8::from_str_radix(digits, 16).unwrap_or(0)
}

fn expand(mask: u8, table: &[Option<SensorId>; 8], out: &mut AnomalySet) {
    for (bit, sensor) in table.iter().enumerate() {
        if let Some(sensor) = sensor {
            if mask & (1 << bit) != 0 {
                out.insert(*sensor);
            }
        }
    }
}

/// Union des capteurs signalés par les deux masques.
pub fn decode(mask1_hex: &str, mask2_hex: &str) -> AnomalySet {
    let mut set = AnomalySet::new();
    expand(hex_to_byte(mask1_hex), &MASK1_SENSORS, &mut set);
    expand(hex_to_byte(mask2_hex), &MASK2_SENSORS, &mut set);
    set
}

/// Inverse de `decode`, utilisé pour fabriquer des trames.
pub fn encode(anomalies: &AnomalySet) -> (u8, u8) {
    let bits = |table: &[Option<SensorId>; 8]| {
        table.iter().enumerate().fold(0u8, |acc, (bit, sensor)| match sensor {
            Some(s) if anomalies.contains(s) => acc | (1 << bit),
            _ => acc,
        })
    };
    (bits(&MASK1_SENSORS), bits(&MASK2_SENSORS))
}
