/*!
FrameBuilder - Construction fluide de trames "A;...;B"

Part d'une trame nominale (tous capteurs normaux, santé 95) ; chaque méthode
modifie une valeur, lève un bit d'anomalie ou casse volontairement la trame.
*/

use aicofire_kernel::anomaly::{self, AnomalySet};
use aicofire_kernel::frame::{FrameLayout, TelemetryFrame, FIELD_SEPARATOR};
use aicofire_kernel::models::{SensorId, SensorReadings};

/// Trame nominale de référence.
pub const NOMINAL_FRAME: &str = "A;25.0;45.0;65.0;35.0;20.0;5.0;350.0;450.0;28.0;27.5;1013.0;2.5;00;00;95.0;B";

const NOMINAL_VALUES: [f64; 12] = [25.0, 45.0, 65.0, 35.0, 20.0, 5.0, 350.0, 450.0, 28.0, 27.5, 1013.0, 2.5];

#[derive(Debug, Clone)]
enum Corruption {
    NoStart,
    NoEnd,
    Truncate(usize),
    Field(SensorId, String),
    RawMask1(String),
}

#[derive(Debug, Clone)]
pub struct FrameBuilder {
    readings: SensorReadings,
    anomalies: AnomalySet,
    panel_health: f64,
    layout: FrameLayout,
    corruptions: Vec<Corruption>,
}

impl FrameBuilder {
    pub fn nominal() -> Self {
        let mut readings = SensorReadings::new();
        for (sensor_id, value) in SensorId::ALL.into_iter().zip(NOMINAL_VALUES) {
            readings.insert(sensor_id, value);
        }
        Self {
            readings,
            anomalies: AnomalySet::new(),
            panel_health: 95.0,
            layout: FrameLayout::Standard,
            corruptions: Vec::new(),
        }
    }

    pub fn value(mut self, sensor_id: SensorId, value: f64) -> Self {
        self.readings.insert(sensor_id, value);
        self
    }

    pub fn anomaly(mut self, sensor_id: SensorId) -> Self {
        self.anomalies.insert(sensor_id);
        self
    }

    pub fn panel_health(mut self, value: f64) -> Self {
        self.panel_health = value;
        self
    }

    pub fn layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Remplace le texte d'un champ capteur (ex: "n/a") pour tester le défaut à 0.
    pub fn garbage(mut self, sensor_id: SensorId, text: &str) -> Self {
        self.corruptions.push(Corruption::Field(sensor_id, text.to_string()));
        self
    }

    /// mask-1 écrit tel quel (hex invalide, valeur > 0xFF...).
    pub fn raw_mask1(mut self, text: &str) -> Self {
        self.corruptions.push(Corruption::RawMask1(text.to_string()));
        self
    }

    pub fn without_start(mut self) -> Self {
        self.corruptions.push(Corruption::NoStart);
        self
    }

    pub fn without_end(mut self) -> Self {
        self.corruptions.push(Corruption::NoEnd);
        self
    }

    /// Garde les `keep` premiers champs puis referme avec "B".
    pub fn truncated(mut self, keep: usize) -> Self {
        self.corruptions.push(Corruption::Truncate(keep));
        self
    }

    pub fn frame(&self) -> TelemetryFrame {
        let (mask1, mask2) = anomaly::encode(&self.anomalies);
        TelemetryFrame { readings: self.readings.clone(), mask1, mask2, panel_health: self.panel_health }
    }

    pub fn build(&self) -> String {
        let encoded = self.frame().encode(self.layout);
        let mut fields: Vec<String> = encoded.split(FIELD_SEPARATOR).map(str::to_string).collect();
        let mask1_index = match self.layout {
            FrameLayout::Standard => 14,
            FrameLayout::SwappedMasks => 13,
        };

        for corruption in &self.corruptions {
            match corruption {
                Corruption::Field(sensor_id, text) => {
                    if let Some(pos) = SensorId::ALL.iter().position(|s| s == sensor_id) {
                        fields[1 + pos] = text.clone();
                    }
                }
                Corruption::RawMask1(text) => fields[mask1_index] = text.clone(),
                Corruption::NoStart => fields[0] = "X".into(),
                Corruption::NoEnd => {
                    fields.pop();
                }
                Corruption::Truncate(keep) => {
                    fields.truncate(*keep);
                    fields.push("B".into());
                }
            }
        }
        fields.join(";")
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::nominal()
    }
}
