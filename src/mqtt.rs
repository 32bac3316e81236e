//! MQTT telemetry listener.
//!
//! Subscribes to the telemetry topic and spawns one ingestion task per
//! publish. Messages from different devices are processed concurrently.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::ingest::Ingestor;
use crate::Config;

// ---

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn client_options(config: &Config) -> MqttOptions {
    // ---
    let mut options = MqttOptions::new(&config.mqtt_client_id, &config.mqtt_host, config.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_session(true);
    if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
        options.set_credentials(username, password);
    }
    options
}

/// Poll the broker connection forever, dispatching telemetry to `ingestor`.
pub async fn run_listener(config: Config, ingestor: Arc<Ingestor>) {
    // ---
    let (client, mut eventloop) = AsyncClient::new(client_options(&config), 64);

    info!(
        broker = %format!("{}:{}", config.mqtt_host, config.mqtt_port),
        topic = %config.mqtt_topic,
        "Starting MQTT telemetry listener"
    );

    poll_events(&client, &mut eventloop, &config.mqtt_topic, ingestor).await;
}

async fn poll_events(client: &AsyncClient, eventloop: &mut EventLoop, topic: &str, ingestor: Arc<Ingestor>) {
    // ---
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Clean sessions drop subscriptions, so resubscribe on every connect.
                match client.try_subscribe(topic, QoS::AtLeastOnce) {
                    Ok(()) => info!(topic = %topic, "Subscribed to telemetry"),
                    Err(e) => error!(topic = %topic, error = %e, "Failed to subscribe"),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let ingestor = ingestor.clone();
                tokio::spawn(async move {
                    ingestor.handle_message(&publish.payload).await;
                });
            }
            Ok(Event::Incoming(packet)) => {
                debug!(?packet, "Received MQTT packet");
            }
            Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                warn!(error = %e, "MQTT connection error, retrying");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
