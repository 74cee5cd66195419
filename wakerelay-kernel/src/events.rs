//! Publishes monitoring completions on MQTT.

use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wakerelay_kernel::config::MqttConf;
use wakerelay_kernel::MonitorCompletion;

pub const COMPLETION_TOPIC: &str = "wakerelay/monitor/completed@v1";

pub fn spawn_completion_publisher(
    conf: MqttConf,
    mut completions: broadcast::Receiver<MonitorCompletion>,
    stop: CancellationToken,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut opts = MqttOptions::new("wakerelay-kernel", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        info!("publishing completions to {}:{} on {}", conf.host, conf.port, COMPLETION_TOPIC);

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = completions.recv() => match received {
                    Ok(completion) => {
                        let payload = match serde_json::to_string(&completion) {
                            Ok(payload) => payload,
                            Err(e) => {
                                error!("cannot encode completion for {}: {}", completion.target_name, e);
                                continue;
                            }
                        };
                        if let Err(e) = client.publish(COMPLETION_TOPIC, QoS::AtLeastOnce, false, payload).await {
                            warn!("failed to publish completion: {:?}", e);
                        } else {
                            debug!("published completion for {}", completion.target_name);
                        }
                    }
                    Err(RecvError::Lagged(missed)) => warn!("completion publisher lagged, {} event(s) dropped", missed),
                    Err(RecvError::Closed) => break,
                },
                event = eventloop.poll() => {
                    if let Err(e) = event {
                        warn!("MQTT error: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
        info!("completion publisher stopped");
    })
}
