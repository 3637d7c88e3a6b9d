/*!
# AICO Fire DevKit - Outils de test pour le pipeline télémétrie

Bibliothèque facilitant le test du kernel sans broker ni firmware:
- Stub MQTT pour simuler le topic télémétrie
- FrameBuilder pour fabriquer des trames valides ou cassées
- TestHarness de bout en bout avec observer d'enregistrement
*/

pub mod frame_builder;
pub mod mqtt_stub;
pub mod test_utils;

pub use frame_builder::{FrameBuilder, NOMINAL_FRAME};
pub use mqtt_stub::MockMqttClient;
pub use test_utils::{RecordingObserver, TestHarness};

#[doc(hidden)]
pub use anyhow;
