/**
 * FRAME - Décodage des trames télémétrie "A;...;B"
 *
 * RÔLE :
 * Transforme une trame brute reçue sur le topic MQTT en valeurs typées :
 * 12 canaux capteurs, deux masques d'anomalies (hex) et la santé du panneau.
 *
 * FORMAT (layout standard) :
 *   [0]  "A"
 *   [1..=12] temperature;humidity;gas;air-quality;no2;co;tvoc;eco2;
 *            surface-temp;surface-temp-2;pressure;current
 *   [13] warning-mask-2 (hex)   [14] warning-mask-1 (hex)
 *   [15] panel health (%)        [dernier] "B"
 *
 * Le layout `swapped_masks` inverse les indices 13/14 (variante firmware observée).
 * Un champ numérique illisible vaut 0 et est signalé dans `defaulted`.
 */

use crate::models::{SensorId, SensorReadings};
use serde::{Deserialize, Serialize};

pub const START_SENTINEL: &str = "A";
pub const END_SENTINEL: &str = "B";
pub const FIELD_SEPARATOR: char = ';';
/// Sentinelles comprises.
pub const MIN_FIELD_COUNT: usize = 17;

const FIRST_SENSOR_FIELD: usize = 1;
const PANEL_HEALTH_FIELD: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: missing start sentinel \"A\"")]
    MissingStartSentinel,
    #[error("malformed frame: missing end sentinel \"B\"")]
    MissingEndSentinel,
    #[error("malformed frame: {found} fields, at least {expected} required")]
    TooFewFields { found: usize, expected: usize },
}

/// Position des masques dans la trame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLayout {
    /// mask-2 en 13, mask-1 en 14
    #[default]
    Standard,
    /// mask-1 en 13, mask-2 en 14
    SwappedMasks,
}

impl FrameLayout {
    /// Indices (mask1, mask2).
    fn mask_fields(self) -> (usize, usize) {
        match self {
            FrameLayout::Standard => (14, 13),
            FrameLayout::SwappedMasks => (13, 14),
        }
    }
}

/// Résultat du décodage d'une trame valide.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFrame {
    pub readings: SensorReadings,
    pub mask1_hex: String,
    pub mask2_hex: String,
    pub panel_health: f64,
    /// Canaux dont la valeur illisible a été remplacée par 0.
    pub defaulted: Vec<SensorId>,
    pub panel_health_defaulted: bool,
}

/// Décode une trame brute. Aucun effet de bord.
pub fn parse(raw: &str, layout: FrameLayout) -> Result<ParsedFrame, FrameError> {
    let fields: Vec<&str> = raw.trim().split(FIELD_SEPARATOR).map(str::trim).collect();

    if fields.first() != Some(&START_SENTINEL) {
        return Err(FrameError::MissingStartSentinel);
    }
    if fields.len() < 2 || fields.last() != Some(&END_SENTINEL) {
        return Err(FrameError::MissingEndSentinel);
    }
    if fields.len() < MIN_FIELD_COUNT {
        return Err(FrameError::TooFewFields { found: fields.len(), expected: MIN_FIELD_COUNT });
    }

    let mut readings = SensorReadings::new();
    let mut defaulted = Vec::new();
    for (offset, sensor_id) in SensorId::ALL.iter().copied().enumerate() {
        match parse_number(fields[FIRST_SENSOR_FIELD + offset]) {
            Some(value) => readings.insert(sensor_id, value),
            None => {
                readings.insert(sensor_id, 0.0);
                defaulted.push(sensor_id);
            }
        }
    }

    let (mask1_field, mask2_field) = layout.mask_fields();
    let health = parse_number(fields[PANEL_HEALTH_FIELD]);

    Ok(ParsedFrame {
        readings,
        mask1_hex: fields[mask1_field].to_string(),
        mask2_hex: fields[mask2_field].to_string(),
        panel_health: health.unwrap_or(0.0),
        defaulted,
        panel_health_defaulted: health.is_none(),
    })
}

fn parse_number(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Trame prête à être encodée (simulateur, outils de test).
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryFrame {
    pub readings: SensorReadings,
    pub mask1: u8,
    pub mask2: u8,
    pub panel_health: f64,
}

impl TelemetryFrame {
    /// Encode au format fil ; les canaux absents sont écrits à 0.
    pub fn encode(&self, layout: FrameLayout) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(MIN_FIELD_COUNT);
        fields.push(START_SENTINEL.to_string());
        for sensor_id in SensorId::ALL {
            fields.push(format!("{:.2}", self.readings.get(sensor_id).unwrap_or(0.0)));
        }
        let (first, second) = match layout {
            FrameLayout::Standard => (self.mask2, self.mask1),
            FrameLayout::SwappedMasks => (self.mask1, self.mask2),
        };
        fields.push(format!("{first:02X}"));
        fields.push(format!("{second:02X}"));
        fields.push(format!("{:.2}", self.panel_health));
        fields.push(END_SENTINEL.to_string());
        fields.join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOMINAL: &str = "A;25.0;45.0;65.0;35.0;20.0;5.0;350.0;450.0;28.0;27.5;1013.0;2.5;00;00;95.0;B";

    #[test]
    fn test_parse_nominal_frame() {
        let frame = parse(NOMINAL, FrameLayout::Standard).unwrap();
        assert_eq!(frame.readings.len(), 12);
        assert_eq!(frame.readings.get(SensorId::Temperature), Some(25.0));
        assert_eq!(frame.readings.get(SensorId::SurfaceTemp2), Some(27.5));
        assert_eq!(frame.readings.get(SensorId::Current), Some(2.5));
        assert_eq!(frame.panel_health, 95.0);
        assert!(frame.defaulted.is_empty());
        assert!(!frame.panel_health_defaulted);
    }

    #[test]
    fn test_parse_tolerates_trailing_newline() {
        let raw = format!("{NOMINAL}\r\n");
        assert!(parse(&raw, FrameLayout::Standard).is_ok());
    }

    #[test]
    fn test_missing_sentinels_are_rejected() {
        let no_start = NOMINAL.replacen("A;", "X;", 1);
        assert_eq!(parse(&no_start, FrameLayout::Standard), Err(FrameError::MissingStartSentinel));

        let no_end = NOMINAL.trim_end_matches(";B");
        assert_eq!(parse(no_end, FrameLayout::Standard), Err(FrameError::MissingEndSentinel));

        assert_eq!(parse("", FrameLayout::Standard), Err(FrameError::MissingStartSentinel));
        assert_eq!(parse("A", FrameLayout::Standard), Err(FrameError::MissingEndSentinel));
    }

    #[test]
    fn test_short_frame_is_rejected() {
        let err = parse("A;25.0;45.0;00;00;95.0;B", FrameLayout::Standard).unwrap_err();
        assert_eq!(err, FrameError::TooFewFields { found: 7, expected: MIN_FIELD_COUNT });
    }

    #[test]
    fn test_unparsable_field_defaults_to_zero() {
        let raw = NOMINAL.replacen("45.0", "n/a", 1);
        let frame = parse(&raw, FrameLayout::Standard).unwrap();
        assert_eq!(frame.readings.get(SensorId::Humidity), Some(0.0));
        assert_eq!(frame.defaulted, vec![SensorId::Humidity]);

        let raw = NOMINAL.replacen("95.0", "NaN", 1);
        let frame = parse(&raw, FrameLayout::Standard).unwrap();
        assert_eq!(frame.panel_health, 0.0);
        assert!(frame.panel_health_defaulted);
    }

    #[test]
    fn test_mask_positions_follow_layout() {
        let raw = "A;1;1;1;1;1;1;1;1;1;1;1;1;0F;03;90;B";
        let standard = parse(raw, FrameLayout::Standard).unwrap();
        assert_eq!((standard.mask1_hex.as_str(), standard.mask2_hex.as_str()), ("03", "0F"));

        let swapped = parse(raw, FrameLayout::SwappedMasks).unwrap();
        assert_eq!((swapped.mask1_hex.as_str(), swapped.mask2_hex.as_str()), ("0F", "03"));
    }

    #[test]
    fn test_encode_is_accepted_by_parser() {
        let mut readings = SensorReadings::new();
        readings.insert(SensorId::Co, 12.5);
        let frame = TelemetryFrame { readings, mask1: 0x20, mask2: 0x01, panel_health: 97.5 };

        let raw = frame.encode(FrameLayout::Standard);
        assert!(raw.starts_with("A;0.00;"));
        assert!(raw.ends_with(";01;20;97.50;B"));

        let parsed = parse(&raw, FrameLayout::Standard).unwrap();
        assert_eq!(parsed.readings.get(SensorId::Co), Some(12.5));
        assert_eq!(parsed.mask1_hex, "20");
        assert_eq!(parsed.mask2_hex, "01");
    }
}
