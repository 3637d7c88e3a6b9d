/*!
Mock MQTT Client pour développement sans broker

Enregistre les abonnements et simule la réception de trames
télémétrie brutes sur un topic. Le TestHarness vide ensuite la file vers le pipeline.
*/

use anyhow::Result;
use rumqttc::QoS;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MockMessage {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Mock MQTT Client qui simule rumqttc::AsyncClient
#[derive(Clone)]
pub struct MockMqttClient {
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

// un test qui panique sous verrou ne doit pas bloquer les suivants
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            message_sender: Arc::new(Mutex::new(None)),
        }
    }

    /// Configuration d'un channel pour recevoir les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *lock(&self.message_sender) = Some(sender);
        receiver
    }

    /// Simule l'abonnement à un topic (compatible avec AsyncClient)
    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        log::info!("[MOCK] subscribed to {}", topic);
        lock(&self.subscriptions).push(topic);
        Ok(())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        lock(&self.subscriptions).iter().any(|t| t == topic)
    }

    /// Simule la réception d'un message ; ignoré si le topic n'est pas souscrit
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<bool>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage { topic: topic.into(), payload: payload.into() };
        if !self.is_subscribed(&message.topic) {
            log::debug!("[MOCK] no subscription for {}, dropped", message.topic);
            return Ok(false);
        }

        let topic = message.topic.clone();
        match lock(&self.message_sender).as_ref() {
            Some(sender) => sender.send(message).map_err(|e| anyhow::anyhow!("send error: {}", e))?,
            None => anyhow::bail!("no receiver set up for mock client"),
        }
        log::info!("[MOCK] simulated incoming on {}", topic);
        Ok(true)
    }

    /// Récupère les abonnements (pour assertions de tests)
    pub fn get_subscriptions(&self) -> Vec<String> {
        lock(&self.subscriptions).clone()
    }
}

impl Default for MockMqttClient {
    fn default() -> Self {
        Self::new()
    }
}
