/*!
Test Harness pour le pipeline télémétrie

Facilite l'écriture de tests de bout en bout avec:
- pipeline réel + MockMqttClient abonné au topic télémétrie
- RecordingObserver qui capture tous les événements émis
- assertions sur capteurs, santé et alertes
*/

use crate::frame_builder::FrameBuilder;
use crate::mqtt_stub::{MockMessage, MockMqttClient};
use aicofire_kernel::alerts::{Alert, AlertConfig};
use aicofire_kernel::frame::FrameLayout;
use aicofire_kernel::health::DeviceHealth;
use aicofire_kernel::state::{SensorState, StoreConfig};
use aicofire_kernel::{ConnectionStatus, DeviceInfo, SensorCatalog, SensorId, SensorStatus, TelemetryObserver, TelemetryPipeline};
use anyhow::Result;
use rumqttc::QoS;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const DEFAULT_TOPIC: &str = "aicofire";
pub const DEFAULT_DEVICE: &str = "device-1";

/// Événement capturé, sous forme possédée.
#[derive(Debug, Clone)]
pub enum Recorded {
    Sensor { device_id: String, sensor_id: SensorId, state: SensorState },
    Health { device_id: String, health: DeviceHealth },
    Alert(Alert),
    Connection(ConnectionStatus),
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingObserver {
    fn push(&self, event: Recorded) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Alert(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    pub fn last_health(&self, device_id: &str) -> Option<DeviceHealth> {
        self.events().into_iter().rev().find_map(|e| match e {
            Recorded::Health { device_id: d, health } if d == device_id => Some(health),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl TelemetryObserver for RecordingObserver {
    fn on_sensor_changed(&self, device_id: &str, sensor_id: SensorId, state: &SensorState) {
        self.push(Recorded::Sensor { device_id: device_id.to_string(), sensor_id, state: state.clone() });
    }

    fn on_device_health_changed(&self, device_id: &str, health: &DeviceHealth) {
        self.push(Recorded::Health { device_id: device_id.to_string(), health: *health });
    }

    fn on_alert(&self, alert: &Alert) {
        self.push(Recorded::Alert(alert.clone()));
    }

    fn on_connection_status(&self, status: ConnectionStatus) {
        self.push(Recorded::Connection(status));
    }
}

/// Harness de test complet : broker simulé -> pipeline -> observer
pub struct TestHarness {
    pub pipeline: TelemetryPipeline,
    pub mqtt_client: MockMqttClient,
    pub observer: Arc<RecordingObserver>,
    pub topic: String,
    pub device_id: String,
    incoming: mpsc::UnboundedReceiver<MockMessage>,
}

impl TestHarness {
    /// Un appareil `device-1`, layout standard, configuration par défaut
    pub async fn new() -> Result<Self> {
        Self::with_config(StoreConfig::default(), AlertConfig::default()).await
    }

    pub async fn with_config(store: StoreConfig, alerts: AlertConfig) -> Result<Self> {
        Self::build(store, alerts, FrameLayout::Standard).await
    }

    /// Firmware dont les masques sont inversés (FrameBuilder::layout doit suivre)
    pub async fn with_layout(layout: FrameLayout) -> Result<Self> {
        Self::build(StoreConfig::default(), AlertConfig::default(), layout).await
    }

    async fn build(store: StoreConfig, alerts: AlertConfig, layout: FrameLayout) -> Result<Self> {
        env_logger::try_init().ok(); // Init logging pour tests

        let pipeline = TelemetryPipeline::new(store, SensorCatalog::default(), &alerts, layout);
        pipeline.register_device(DeviceInfo::new(DEFAULT_DEVICE))?;
        let observer = Arc::new(RecordingObserver::default());
        pipeline.subscribe(observer.clone());

        let mqtt_client = MockMqttClient::new();
        let incoming = mqtt_client.setup_receiver();
        mqtt_client.subscribe(DEFAULT_TOPIC, QoS::AtMostOnce).await?;
        pipeline.set_connection_status(ConnectionStatus::Connected);

        Ok(Self {
            pipeline,
            mqtt_client,
            observer,
            topic: DEFAULT_TOPIC.to_string(),
            device_id: DEFAULT_DEVICE.to_string(),
            incoming,
        })
    }

    /// Publie une trame brute sur le topic télémétrie (non traitée avant `pump`)
    pub async fn send_frame(&self, raw: &str) -> Result<()> {
        self.mqtt_client.simulate_incoming(self.topic.clone(), raw.as_bytes().to_vec()).await?;
        Ok(())
    }

    pub async fn send(&self, frame: &FrameBuilder) -> Result<()> {
        self.send_frame(&frame.build()).await
    }

    /// Vide la file simulée vers le pipeline ; retourne le nombre de trames acceptées
    pub fn pump(&mut self) -> usize {
        let mut accepted = 0;
        while let Ok(message) = self.incoming.try_recv() {
            let Some(raw) = message.payload_str() else {
                log::warn!("non utf-8 payload on {}", message.topic);
                continue;
            };
            if self.pipeline.on_message(&self.device_id, raw).is_some() {
                accepted += 1;
            }
        }
        log::debug!("pumped {} frames", accepted);
        accepted
    }

    /// send + pump en un appel
    pub async fn feed(&mut self, frame: &FrameBuilder) -> Result<usize> {
        self.send(frame).await?;
        Ok(self.pump())
    }

    pub fn sensor(&self, sensor_id: SensorId) -> Result<SensorState> {
        self.pipeline
            .sensor(&self.device_id, sensor_id)?
            .ok_or_else(|| anyhow::anyhow!("sensor {} not attached to {}", sensor_id, self.device_id))
    }

    pub fn assert_sensor_status(&self, sensor_id: SensorId, expected: SensorStatus) -> Result<()> {
        let actual = self.sensor(sensor_id)?.status;
        if actual != expected {
            anyhow::bail!("sensor {}: expected {:?}, got {:?}", sensor_id, expected, actual);
        }
        log::info!("sensor {} is {:?}", sensor_id, expected);
        Ok(())
    }

    pub fn assert_health(&self, score: f64, status: SensorStatus) -> Result<()> {
        let device = self
            .pipeline
            .device(&self.device_id)
            .ok_or_else(|| anyhow::anyhow!("device {} missing", self.device_id))?;
        if device.health_score != score || device.overall_status != status {
            anyhow::bail!(
                "health mismatch: expected {} / {:?}, got {} / {:?}",
                score,
                status,
                device.health_score,
                device.overall_status
            );
        }
        Ok(())
    }

    pub fn assert_alert_count(&self, expected: usize) -> Result<()> {
        let actual = self.pipeline.alerts(None).len();
        if actual != expected {
            anyhow::bail!("expected {} alerts, got {}", expected, actual);
        }
        Ok(())
    }

    /// Reset alertes et événements capturés (l'état capteurs est conservé)
    pub fn reset(&mut self) {
        self.pipeline.clear_alerts();
        self.observer.clear();
        while self.incoming.try_recv().is_ok() {}
        log::info!("test harness reset");
    }
}

/// Macro pour écrire un test harness en une ligne
#[macro_export]
macro_rules! telemetry_test {
    ($name:ident, |$harness:ident| $body:block) => {
        #[tokio::test]
        async fn $name() {
            #[allow(unused_mut)]
            let mut $harness = $crate::test_utils::TestHarness::new().await.unwrap();
            let result: $crate::anyhow::Result<()> = async { $body }.await;
            if let Err(e) = result {
                panic!("Test '{}' failed: {}", stringify!($name), e);
            }
        }
    };
}
