/**
 * CONNECTION SUPERVISOR - Machine à états de la liaison MQTT
 *
 * RÔLE :
 * Suit l'état de la connexion et décide des reconnexions, indépendamment
 * du transport (mqtt.rs pilote la machine avec rumqttc).
 *
 * ÉTATS :
 *   Disconnected -> Connecting -> Connected -> (ConnectionLost | ConnectFailure) -> Disconnected
 *   Disconnected --(délai base + n x incrément)--> Connecting
 *   n >= max_attempts -> Error (terminal jusqu'à reset explicite)
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkFailure {
    #[error("connect failure: {0}")]
    ConnectFailure(String),
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub increment_ms: u64,
    pub max_attempts: u32,
    pub connect_timeout_secs: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay_ms: 3000, increment_ms: 1000, max_attempts: 10, connect_timeout_secs: 10 }
    }
}

impl ReconnectPolicy {
    /// Délai avant la tentative numéro `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let extra = u64::from(attempt).saturating_mul(self.increment_ms);
        Duration::from_millis(self.base_delay_ms.saturating_add(extra))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    RetryIn(Duration),
    GiveUp,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub status: ConnectionStatus,
    pub attempts: u32,
    pub reconnects: u32,
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct ConnectionSupervisor {
    policy: ReconnectPolicy,
    status: ConnectionStatus,
    attempts: u32,
    reconnects: u32,
    last_error: Option<String>,
}

impl ConnectionSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, status: ConnectionStatus::Disconnected, attempts: 0, reconnects: 0, last_error: None }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            status: self.status,
            attempts: self.attempts,
            reconnects: self.reconnects,
            last_error: self.last_error.clone(),
        }
    }

    /// Passe en Connecting. Refusé en Error : il faut `reset` d'abord.
    pub fn begin_connect(&mut self) -> bool {
        match self.status {
            ConnectionStatus::Disconnected => {
                self.status = ConnectionStatus::Connecting;
                true
            }
            ConnectionStatus::Connecting | ConnectionStatus::Connected | ConnectionStatus::Error => false,
        }
    }

    pub fn on_connected(&mut self) {
        if self.attempts > 0 {
            self.reconnects += 1;
        }
        self.status = ConnectionStatus::Connected;
        self.attempts = 0;
        self.last_error = None;
    }

    /// Échec ou perte de liaison : Disconnected puis délai, ou Error si plafond atteint.
    pub fn on_failure(&mut self, failure: &LinkFailure) -> RetryDecision {
        self.last_error = Some(failure.to_string());
        if self.attempts >= self.policy.max_attempts {
            self.status = ConnectionStatus::Error;
            return RetryDecision::GiveUp;
        }
        self.status = ConnectionStatus::Disconnected;
        self.attempts += 1;
        RetryDecision::RetryIn(self.policy.delay_for(self.attempts))
    }

    /// Idempotent. Retourne true si l'état a changé.
    pub fn disconnect(&mut self) -> bool {
        let changed = self.status != ConnectionStatus::Disconnected;
        self.status = ConnectionStatus::Disconnected;
        self.attempts = 0;
        changed
    }

    /// Relance manuelle après Error.
    pub fn reset(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.attempts = 0;
        self.last_error = None;
    }
}
