/**
 * DEMO SOURCE - Générateur de trames réalistes sans broker
 *
 * RÔLE :
 * Remplace le transport MQTT pour les démos et le développement : produit
 * périodiquement une trame "A;...;B" et la pousse dans le même point d'entrée
 * que le broker (TelemetryPipeline::on_message).
 *
 * FONCTIONNEMENT :
 * - valeurs autour d'une ligne de base nominale, bruit borné à ±2% de la plage
 * - avec une probabilité `anomaly_probability`, un bit d'anomalie aléatoire est levé
 * - timer annulable ; DemoHandle::stop attend la fin de la tâche
 * - la liaison est signalée Connected pendant la démo, Disconnected à l'arrêt
 */

use crate::anomaly::{self, AnomalySet};
use crate::config::DemoConf;
use crate::frame::{FrameLayout, TelemetryFrame};
use crate::models::{SensorCatalog, SensorId, SensorReadings};
use crate::pipeline::TelemetryPipeline;
use crate::supervisor::ConnectionStatus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const BASELINE: [(SensorId, f64); 12] = [
    (SensorId::Temperature, 25.0),
    (SensorId::Humidity, 45.0),
    (SensorId::Gas, 65.0),
    (SensorId::AirQuality, 35.0),
    (SensorId::No2, 20.0),
    (SensorId::Co, 5.0),
    (SensorId::Tvoc, 350.0),
    (SensorId::Eco2, 450.0),
    (SensorId::SurfaceTemp, 28.0),
    (SensorId::SurfaceTemp2, 27.5),
    (SensorId::Pressure, 1013.0),
    (SensorId::Current, 2.5),
];

const NOISE_RATIO: f64 = 0.02;

pub struct DemoSource {
    rng: StdRng,
    catalog: SensorCatalog,
    anomaly_probability: f64,
}

impl DemoSource {
    pub fn new(anomaly_probability: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), anomaly_probability)
    }

    pub fn with_rng(rng: StdRng, anomaly_probability: f64) -> Self {
        Self { rng, catalog: SensorCatalog::default(), anomaly_probability: anomaly_probability.clamp(0.0, 1.0) }
    }

    pub fn next_frame(&mut self) -> TelemetryFrame {
        let mut readings = SensorReadings::new();
        for (sensor_id, base) in BASELINE {
            let def = self.catalog.get(sensor_id);
            let span = def.display_max - def.display_min;
            let noise = self.rng.gen_range(-1.0..=1.0) * span * NOISE_RATIO;
            let value = (base + noise).clamp(def.display_min, def.display_max);
            readings.insert(sensor_id, (value * 100.0).round() / 100.0);
        }

        let mut anomalies = AnomalySet::new();
        if self.rng.gen_bool(self.anomaly_probability) {
            let pick = SensorId::ALL[self.rng.gen_range(0..SensorId::ALL.len())];
            anomalies.insert(pick);
        }
        let (mask1, mask2) = anomaly::encode(&anomalies);

        TelemetryFrame { readings, mask1, mask2, panel_health: self.rng.gen_range(90.0..=100.0_f64).round() }
    }
}

pub struct DemoHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl DemoHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "demo task ended abnormally");
        }
    }
}

pub fn spawn_demo(cfg: &DemoConf, device_id: String, layout: FrameLayout, pipeline: TelemetryPipeline) -> DemoHandle {
    let (stop, mut stop_rx) = oneshot::channel();
    let period = Duration::from_millis(cfg.interval_ms.max(1));
    let mut source = DemoSource::new(cfg.anomaly_probability);
    tracing::info!(device_id = %device_id, interval_ms = cfg.interval_ms, "demo data source started");
    pipeline.set_connection_status(ConnectionStatus::Connected);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let raw = source.next_frame().encode(layout);
                    pipeline.on_message(&device_id, &raw);
                }
                _ = &mut stop_rx => break,
            }
        }
        pipeline.set_connection_status(ConnectionStatus::Disconnected);
        tracing::info!(device_id = %device_id, "demo data source stopped");
    });

    DemoHandle { stop, task }
}
