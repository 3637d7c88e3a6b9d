/**
 * CONFIG - Chargement de aicofire.yaml + surcharges d'environnement
 *
 * FONCTIONNEMENT :
 * - chemin : AICOFIRE_CONFIG (défaut "aicofire.yaml")
 * - fichier absent ou vide -> défauts ; fichier invalide -> log + défauts
 * - surcharges : AICOFIRE_MQTT_HOST, AICOFIRE_MQTT_PORT, AICOFIRE_MQTT_TOPIC,
 *   AICOFIRE_HTTP_BIND, AICOFIRE_API_KEY
 * - validation après fusion ; une config incohérente est refusée au démarrage
 */

use crate::alerts::AlertConfig;
use crate::frame::FrameLayout;
use crate::models::{SensorCatalog, SensorId};
use crate::state::{DeviceInfo, StoreConfig};
use crate::supervisor::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

pub const CONFIG_ENV: &str = "AICOFIRE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "aicofire.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub topic: String,
    /// Appareil auquel sont rattachées les trames du topic
    pub device_id: String,
    pub client_id_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            topic: "aicofire".into(),
            device_id: "device-1".into(),
            client_id_prefix: "aicofire-kernel".into(),
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConf {
    pub layout: FrameLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverride {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    /// Clé exigée sur les routes de mutation ; vide = mutations refusées
    pub api_key: Option<String>,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into(), api_key: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConf {
    pub enabled: bool,
    pub interval_ms: u64,
    pub anomaly_probability: f64,
}

impl Default for DemoConf {
    fn default() -> Self {
        Self { enabled: false, interval_ms: 2000, anomaly_probability: 0.05 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConf,
    pub reconnect: ReconnectPolicy,
    pub store: StoreConfig,
    pub frame: FrameConf,
    pub alerts: AlertConfig,
    pub devices: Vec<DeviceInfo>,
    pub thresholds: BTreeMap<SensorId, ThresholdOverride>,
    pub http: HttpConf,
    pub demo: DemoConf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            reconnect: ReconnectPolicy::default(),
            store: StoreConfig::default(),
            frame: FrameConf::default(),
            alerts: AlertConfig::default(),
            devices: vec![DeviceInfo::new("device-1")],
            thresholds: BTreeMap::new(),
            http: HttpConf::default(),
            demo: DemoConf::default(),
        }
    }
}

impl AppConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    /// Applique les surcharges d'environnement via `lookup` (injectable en test).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("AICOFIRE_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("AICOFIRE_MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { key: "AICOFIRE_MQTT_PORT", value: port.clone() })?;
        }
        if let Some(topic) = lookup("AICOFIRE_MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(bind) = lookup("AICOFIRE_HTTP_BIND") {
            self.http.bind = bind;
        }
        if let Some(key) = lookup("AICOFIRE_API_KEY") {
            self.http.api_key = Some(key);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.history_capacity < 1 {
            return Err(ConfigError::Invalid("store.history_capacity must be >= 1".into()));
        }
        if self.store.trend_window < 2 {
            return Err(ConfigError::Invalid("store.trend_window must be >= 2".into()));
        }
        if self.reconnect.max_attempts < 1 {
            return Err(ConfigError::Invalid("reconnect.max_attempts must be >= 1".into()));
        }
        if self.alerts.capacity < 1 {
            return Err(ConfigError::Invalid("alerts.capacity must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.demo.anomaly_probability) {
            return Err(ConfigError::Invalid("demo.anomaly_probability must be within [0, 1]".into()));
        }
        for (sensor, t) in &self.thresholds {
            if !(t.warning <= t.critical) {
                return Err(ConfigError::Invalid(format!(
                    "thresholds.{sensor}: warning {} > critical {}",
                    t.warning, t.critical
                )));
            }
        }
        Ok(())
    }

    /// Catalogue par défaut + surcharges de seuils.
    pub fn catalog(&self) -> Result<SensorCatalog, ConfigError> {
        let mut catalog = SensorCatalog::default();
        for (sensor, t) in &self.thresholds {
            catalog
                .set_thresholds(*sensor, t.warning, t.critical)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(catalog)
    }
}

/// Lit le fichier, retombe sur les défauts si absent ou illisible.
pub async fn load_config_from(path: &Path) -> AppConfig {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        return AppConfig::default();
    }
    let txt = match fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(source) => {
            let e = ConfigError::Io { path: path.display().to_string(), source };
            tracing::error!(error = %e, "config unreadable, using defaults");
            return AppConfig::default();
        }
    };
    AppConfig::from_yaml(&txt).unwrap_or_else(|e| {
        tracing::error!(path = %path.display(), error = %e, "config invalid, using defaults");
        AppConfig::default()
    })
}

/// Fichier + environnement + validation.
pub async fn load_config() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = load_config_from(Path::new(&path)).await;
    cfg.apply_env_with(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
