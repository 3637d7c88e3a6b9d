/**
 * MQTT RUNNER - Liaison broker pilotée par le ConnectionSupervisor
 *
 * RÔLE :
 * Ouvre la session rumqttc, s'abonne au topic télémétrie et pousse chaque
 * payload vers TelemetryPipeline::on_message. Les décisions de reconnexion
 * sont prises par supervisor.rs ; ce module n'en fait que l'exécution.
 *
 * FONCTIONNEMENT :
 * - attente du ConnAck bornée par connect_timeout (échec = ConnectTimeout)
 * - erreur d'eventloop = ConnectionLost -> délai linéaire -> nouvelle session
 * - plafond atteint = Error, plus aucune tentative avant Reconnect explicite
 * - commandes (Reconnect / Disconnect / Shutdown) prises en compte à tout moment,
 *   y compris pendant l'attente de reconnexion
 */

use crate::config::MqttConf;
use crate::pipeline::TelemetryPipeline;
use crate::state::{new_state, Shared};
use crate::supervisor::{ConnectionSupervisor, LinkFailure, ReconnectPolicy, RetryDecision, SupervisorSnapshot};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttCommand {
    Reconnect,
    Disconnect,
    Shutdown,
}

/// Poignée clonable pour piloter la liaison (API HTTP, main).
#[derive(Clone)]
pub struct MqttControl {
    tx: mpsc::Sender<MqttCommand>,
    supervisor: Shared<ConnectionSupervisor>,
}

impl MqttControl {
    pub async fn send(&self, command: MqttCommand) -> bool {
        self.tx.send(command).await.is_ok()
    }

    pub fn snapshot(&self) -> SupervisorSnapshot {
        self.supervisor.lock().snapshot()
    }
}

pub struct MqttHandle {
    control: MqttControl,
    task: JoinHandle<()>,
}

impl MqttHandle {
    pub fn control(&self) -> MqttControl {
        self.control.clone()
    }

    /// Annule toute reconnexion en attente et attend la fin de la tâche.
    pub async fn shutdown(self) {
        self.control.send(MqttCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "mqtt task ended abnormally");
        }
    }
}

pub fn client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..8])
}

pub fn spawn_mqtt_supervisor(cfg: MqttConf, policy: ReconnectPolicy, pipeline: TelemetryPipeline) -> MqttHandle {
    let (tx, rx) = mpsc::channel(8);
    let supervisor = new_state(ConnectionSupervisor::new(policy));
    let runner = Runner { cfg, pipeline, supervisor: supervisor.clone(), rx };
    let task = tokio::spawn(runner.run());
    MqttHandle { control: MqttControl { tx, supervisor }, task }
}

enum SessionEnd {
    Command(MqttCommand),
    Failed(LinkFailure),
}

struct Runner {
    cfg: MqttConf,
    pipeline: TelemetryPipeline,
    supervisor: Shared<ConnectionSupervisor>,
    rx: mpsc::Receiver<MqttCommand>,
}

impl Runner {
    /// Recopie le statut du superviseur dans le pipeline (observers, offline).
    fn publish_status(&self) {
        let status = self.supervisor.lock().status();
        self.pipeline.set_connection_status(status);
    }

    async fn run(mut self) {
        let mut wanted = true;
        loop {
            if !wanted {
                match self.rx.recv().await {
                    Some(MqttCommand::Reconnect) => {
                        self.supervisor.lock().reset();
                        wanted = true;
                    }
                    Some(MqttCommand::Disconnect) => {
                        self.supervisor.lock().disconnect();
                        self.publish_status();
                        continue;
                    }
                    Some(MqttCommand::Shutdown) | None => break,
                }
            }

            if !self.supervisor.lock().begin_connect() {
                self.supervisor.lock().reset();
                self.supervisor.lock().begin_connect();
            }
            self.publish_status();
            tracing::info!(host = %self.cfg.host, port = self.cfg.port, "connecting to broker");

            match self.session().await {
                SessionEnd::Command(MqttCommand::Shutdown) => break,
                SessionEnd::Command(MqttCommand::Disconnect) => {
                    self.supervisor.lock().disconnect();
                    self.publish_status();
                    tracing::info!("mqtt disconnected on request");
                    wanted = false;
                }
                SessionEnd::Command(MqttCommand::Reconnect) => {
                    self.supervisor.lock().reset();
                    self.publish_status();
                }
                SessionEnd::Failed(failure) => {
                    let decision = self.supervisor.lock().on_failure(&failure);
                    self.publish_status();
                    match decision {
                        RetryDecision::RetryIn(delay) => {
                            tracing::warn!(error = %failure, retry_in_ms = delay.as_millis() as u64, "mqtt link down");
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                cmd = self.rx.recv() => match cmd {
                                    Some(MqttCommand::Reconnect) => self.supervisor.lock().reset(),
                                    Some(MqttCommand::Disconnect) => {
                                        self.supervisor.lock().disconnect();
                                        self.publish_status();
                                        wanted = false;
                                    }
                                    Some(MqttCommand::Shutdown) | None => break,
                                },
                            }
                        }
                        RetryDecision::GiveUp => {
                            tracing::error!(error = %failure, "mqtt max reconnect attempts reached, waiting for manual reconnect");
                            wanted = false;
                        }
                    }
                }
            }
        }

        self.supervisor.lock().disconnect();
        self.publish_status();
        tracing::info!("mqtt supervisor stopped");
    }

    async fn session(&mut self) -> SessionEnd {
        let mut opts = MqttOptions::new(client_id(&self.cfg.client_id_prefix), &self.cfg.host, self.cfg.port);
        opts.set_keep_alive(Duration::from_secs(self.cfg.keep_alive_secs.max(1)));
        opts.set_clean_session(true);
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        let timeout = self.supervisor.lock().policy().connect_timeout();

        let connack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(LinkFailure::ConnectFailure(format!("broker refused: {:?}", ack.code)))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(LinkFailure::ConnectFailure(e.to_string())),
                }
            }
        };

        tokio::select! {
            res = tokio::time::timeout(timeout, connack) => match res {
                Err(_) => return SessionEnd::Failed(LinkFailure::ConnectTimeout(timeout)),
                Ok(Err(failure)) => return SessionEnd::Failed(failure),
                Ok(Ok(())) => {}
            },
            cmd = self.rx.recv() => return SessionEnd::Command(cmd.unwrap_or(MqttCommand::Shutdown)),
        }

        self.supervisor.lock().on_connected();
        self.publish_status();
        if let Err(e) = client.subscribe(&self.cfg.topic, QoS::AtMostOnce).await {
            return SessionEnd::Failed(LinkFailure::ConnectFailure(format!("subscribe failed: {e}")));
        }
        tracing::info!(topic = %self.cfg.topic, device_id = %self.cfg.device_id, "mqtt connected and subscribed");

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == self.cfg.topic => {
                        match std::str::from_utf8(&p.payload) {
                            Ok(raw) => {
                                self.pipeline.on_message(&self.cfg.device_id, raw);
                            }
                            Err(_) => tracing::warn!(topic = %p.topic, "non utf-8 payload dropped"),
                        }
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        return SessionEnd::Failed(LinkFailure::ConnectionLost("broker sent disconnect".into()));
                    }
                    Ok(_) => {}
                    Err(e) => return SessionEnd::Failed(LinkFailure::ConnectionLost(e.to_string())),
                },
                cmd = self.rx.recv() => {
                    let cmd = cmd.unwrap_or(MqttCommand::Shutdown);
                    if let Err(e) = client.disconnect().await {
                        tracing::debug!(error = %e, "mqtt disconnect request failed");
                    }
                    return SessionEnd::Command(cmd);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertConfig;
    use crate::frame::FrameLayout;
    use crate::models::SensorCatalog;
    use crate::state::StoreConfig;
    use crate::supervisor::ConnectionStatus;

    fn pipeline() -> TelemetryPipeline {
        TelemetryPipeline::new(StoreConfig::default(), SensorCatalog::default(), &AlertConfig::default(), FrameLayout::Standard)
    }

    #[test]
    fn test_client_id_has_prefix_and_suffix() {
        let id = client_id("aicofire");
        assert!(id.starts_with("aicofire-"));
        assert_eq!(id.len(), "aicofire-".len() + 8);
        assert_ne!(client_id("aicofire"), id);
    }

    #[tokio::test]
    async fn test_unreachable_broker_schedules_retry_and_shuts_down() {
        // port 1 : connexion refusée immédiatement
        let cfg = MqttConf { host: "127.0.0.1".into(), port: 1, ..MqttConf::default() };
        let policy = ReconnectPolicy { base_delay_ms: 60_000, connect_timeout_secs: 2, ..ReconnectPolicy::default() };
        let pipeline = pipeline();
        let handle = spawn_mqtt_supervisor(cfg, policy, pipeline.clone());
        let control = handle.control();

        let mut attempts = 0;
        for _ in 0..50 {
            attempts = control.snapshot().attempts;
            if attempts > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(attempts, 1);
        assert_eq!(control.snapshot().status, ConnectionStatus::Disconnected);

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown()).await.unwrap();
        assert_eq!(pipeline.connection_status(), ConnectionStatus::Disconnected);
    }

    async fn wait_for(control: &MqttControl, pred: impl Fn(&SupervisorSnapshot) -> bool) -> SupervisorSnapshot {
        for _ in 0..100 {
            let snap = control.snapshot();
            if pred(&snap) {
                return snap;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        control.snapshot()
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_retry() {
        let cfg = MqttConf { host: "127.0.0.1".into(), port: 1, ..MqttConf::default() };
        let policy = ReconnectPolicy { base_delay_ms: 60_000, connect_timeout_secs: 2, ..ReconnectPolicy::default() };
        let pipeline = pipeline();
        let handle = spawn_mqtt_supervisor(cfg, policy, pipeline.clone());
        let control = handle.control();

        assert_eq!(wait_for(&control, |s| s.attempts == 1).await.attempts, 1);
        assert!(control.send(MqttCommand::Disconnect).await);

        let snap = wait_for(&control, |s| s.attempts == 0).await;
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.attempts, 0);

        // plus aucune tentative tant qu'aucun Reconnect n'arrive
        tokio::time::sleep(Duration::from_millis(200)).await;
        let snap = control.snapshot();
        assert_eq!(snap.status, ConnectionStatus::Disconnected);
        assert_eq!(snap.attempts, 0);
        assert_eq!(pipeline.connection_status(), ConnectionStatus::Disconnected);

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn test_max_attempts_ends_in_error() {
        let cfg = MqttConf { host: "127.0.0.1".into(), port: 1, ..MqttConf::default() };
        let policy =
            ReconnectPolicy { base_delay_ms: 10, increment_ms: 0, max_attempts: 2, connect_timeout_secs: 2 };
        let pipeline = pipeline();
        let handle = spawn_mqtt_supervisor(cfg, policy, pipeline.clone());
        let control = handle.control();

        let snap = wait_for(&control, |s| s.status == ConnectionStatus::Error).await;
        assert_eq!(snap.status, ConnectionStatus::Error);
        assert_eq!(snap.attempts, 2);
        assert!(snap.last_error.is_some());
        assert_eq!(pipeline.connection_status(), ConnectionStatus::Error);

        // terminal : pas de nouvelle tentative
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(control.snapshot().status, ConnectionStatus::Error);

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown()).await.unwrap();
    }
}
