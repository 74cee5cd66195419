/*!
# WakeRelay DevKit - Mocks et utilitaires de test

Bibliothèque facilitant les tests du kernel WakeRelay:
- Provider/canaux d'exécution distante en mémoire
- Probe de joignabilité scriptée
- Harness montant un orchestrateur complet sur les mocks
*/

pub mod probe_stub;
pub mod remote_stub;
pub mod test_utils;

pub use probe_stub::ScriptedProbe;
pub use remote_stub::{MockChannel, MockChannelProvider};
pub use test_utils::{fast_config, proxy_groups, TestHarness};
