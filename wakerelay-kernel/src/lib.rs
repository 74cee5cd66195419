/*!
 * WAKERELAY KERNEL - Orchestration Wake-on-LAN relayée par des proxies
 *
 * RÔLE : Valide cibles et proxies, envoie les magic packets via des canaux
 * d'exécution distants mutualisés par proxy, puis surveille le réveil des cibles.
 *
 * ARCHITECTURE : Scheduler par proxy → ProxyRequestProcessor → ResultManager,
 * boucle de monitoring en tâche de fond alimentant les résultats par événement.
 */

pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod pool;
pub mod processor;
pub mod remote;
pub mod results;
pub mod scheduler;
pub mod script;
pub mod service;
pub mod validation;
pub mod wol;

pub use config::{KernelConfig, WakeOptions};
pub use error::{ProbeError, RemoteError, WakeError};
pub use models::{Credentials, MonitorCompletion, MonitorEntry, TargetSpec, WakeOnLanReturn};
pub use service::WakeOrchestrator;
