use super::{Channel, ChannelError, Emitter, InboundMessage, OutboundMessage};
use crate::config::BrokerConfig;
use rumqttc::{AsyncClient, ConnAck, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const INBOUND_NAMES: [&str; 3] = ["created", "state", "error"];

struct MqttEmitter {
    client: AsyncClient,
    prefix: String,
}

impl Emitter for MqttEmitter {
    fn emit(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        let topic = format!("{}/{}", self.prefix, message.name());
        let payload = message.payload()?;
        debug!("Publishing {} ({} bytes)", topic, payload.len());
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| ChannelError::SendError(e.to_string()))
    }
}

/// Splits `<prefix>/<name>` and returns the message name.
fn message_name<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
}

/// A clean session comes back without subscriptions.
fn needs_resubscribe(ack: &ConnAck) -> bool {
    !ack.session_present
}

fn subscribe_inbound(client: &AsyncClient, prefix: &str) {
    for name in INBOUND_NAMES {
        let topic = format!("{}/{}", prefix, name);
        match client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            Ok(()) => debug!("Subscribed to {}", topic),
            Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
        }
    }
}

/// Connects to the broker and returns a channel bound to `<prefix>/...`.
///
/// The rumqttc event loop runs in its own task and reconnects on its own;
/// connection errors are logged and retried after a second. Inbound topics
/// are subscribed on every fresh broker session.
pub fn connect(config: &BrokerConfig) -> Result<Channel, ChannelError> {
    if config.client_id.is_empty() || config.client_id.starts_with(char::is_whitespace) {
        return Err(ChannelError::ConnectionError(format!(
            "invalid client id {:?}",
            config.client_id
        )));
    }
    info!(
        "Connecting to MQTT broker {}:{} as {}",
        config.host, config.port, config.client_id
    );
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(options, 100);
    let (inbound_tx, inbound_rx) = mpsc::channel(100);
    tokio::spawn(pump_events(
        eventloop,
        client.clone(),
        config.topic_prefix.clone(),
        inbound_tx,
    ));

    let emitter = MqttEmitter {
        client,
        prefix: config.topic_prefix.clone(),
    };
    Ok(Channel::new(Box::new(emitter), inbound_rx))
}

async fn pump_events(
    mut eventloop: EventLoop,
    client: AsyncClient,
    prefix: String,
    inbound: mpsc::Sender<InboundMessage>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(name) = message_name(&prefix, &publish.topic) else {
                    debug!("Ignoring publish on {}", publish.topic);
                    continue;
                };
                match InboundMessage::decode(name, &publish.payload) {
                    Ok(message) => {
                        if inbound.send(message).await.is_err() {
                            info!("Inbound receiver dropped, stopping MQTT event loop");
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping inbound message: {}", e),
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT broker connection established");
                if needs_resubscribe(&ack) {
                    subscribe_inbound(&client, &prefix);
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::ConnectReturnCode;

    #[test]
    fn topics_outside_prefix_are_skipped() {
        assert_eq!(message_name("padcast", "padcast/state"), Some("state"));
        assert_eq!(message_name("padcast", "padcast"), None);
        assert_eq!(message_name("padcast", "padcaststate"), None);
        assert_eq!(message_name("padcast", "other/state"), None);
    }

    #[test]
    fn fresh_broker_sessions_resubscribe() {
        let fresh = ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        };
        let resumed = ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
        };
        assert!(needs_resubscribe(&fresh));
        assert!(!needs_resubscribe(&resumed));
    }

    #[test]
    fn blank_client_ids_are_rejected() {
        let config = BrokerConfig {
            client_id: " padcast".to_string(),
            ..BrokerConfig::default()
        };
        assert!(matches!(
            connect(&config),
            Err(ChannelError::ConnectionError(_))
        ));
    }
}
