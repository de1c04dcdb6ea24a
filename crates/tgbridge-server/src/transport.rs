//! Pub/sub transport to the home-automation broker.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tgbridge_core::MqttConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

const CLIENT_ID: &str = "toogoodtogo-ha-mqtt-bridge";
const RECONNECT_DELAY: Duration = Duration::from_secs(30);
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const REQUEST_CHANNEL_CAPACITY: usize = 64;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Queues a message. An empty payload on a discovery topic retracts the entity.
    ///
    /// Fails without waiting when the message cannot be handed to the broker.
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
}

/// Remote control of intense fetch, received on the switch command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntenseCommand {
    On,
    Off,
}

impl IntenseCommand {
    #[must_use]
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match std::str::from_utf8(payload).ok()?.trim() {
            "ON" => Some(Self::On),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }
}

/// [`Transport`] over an MQTT 3.1.1 connection.
pub struct MqttTransport {
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<String>>>,
    /// `true` from `ConnAck` until the next connection error.
    connected: watch::Receiver<bool>,
}

impl MqttTransport {
    /// Creates the client and spawns the task that drives its network loop.
    ///
    /// Messages on `command_topic` are forwarded to `commands`. The loop
    /// exits when `shutdown` is cancelled.
    pub fn connect(
        config: &MqttConfig,
        command_topic: String,
        commands: mpsc::Sender<IntenseCommand>,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(CLIENT_ID, config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let (connected_tx, connected) = watch::channel(false);
        let pump = EventPump {
            client: client.clone(),
            subscriptions: Arc::clone(&subscriptions),
            connected: connected_tx,
            command_topic,
            commands,
        };
        tracing::info!(host = %config.host, port = config.port, "connecting to MQTT broker");
        let handle = tokio::spawn(pump.run(eventloop, shutdown));

        (
            Self {
                client,
                subscriptions,
                connected,
            },
            handle,
        )
    }

    /// Waits up to `timeout` for the broker to accept the connection.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        let up = matches!(
            tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        up
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Sends a DISCONNECT so the broker does not wait for the keep-alive.
    pub fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!(error = %e, "MQTT disconnect failed");
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected {
                topic: topic.to_owned(),
            });
        }
        // A full request queue is an error, not a wait.
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !subscriptions.iter().any(|t| t == topic) {
                subscriptions.push(topic.to_owned());
            }
        }
        // While disconnected the topic is picked up by the next `ConnAck`.
        if self.is_connected() {
            self.client.try_subscribe(topic, QoS::AtLeastOnce)?;
        }
        Ok(())
    }
}

struct EventPump {
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connected: watch::Sender<bool>,
    command_topic: String,
    commands: mpsc::Sender<IntenseCommand>,
}

impl EventPump {
    async fn run(self, mut eventloop: EventLoop, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("MQTT connected");
                    self.connected.send_replace(true);
                    self.resubscribe();
                }
                Ok(Event::Incoming(Packet::Publish(message))) => {
                    self.on_message(&message.topic, &message.payload).await;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.connected.send_replace(false);
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.send_replace(false);
                    tracing::error!(
                        error = %e,
                        "MQTT connection lost, trying to reconnect in {}s",
                        RECONNECT_DELAY.as_secs()
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                    tracing::debug!("reconnecting to MQTT broker");
                }
            }
        }
        tracing::debug!("MQTT event loop stopped");
    }

    /// Subscriptions do not survive a clean-session reconnect.
    fn resubscribe(&self) {
        let topics = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for topic in topics {
            // `try_` because awaiting here would block the loop that drains the queue.
            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                tracing::warn!(topic, error = %e, "failed to resubscribe");
            }
        }
    }

    async fn on_message(&self, topic: &str, payload: &[u8]) {
        if topic != self.command_topic {
            tracing::debug!(topic, "ignoring message on unexpected topic");
            return;
        }
        match IntenseCommand::from_payload(payload) {
            Some(command) => {
                tracing::debug!(?command, "intense fetch command received");
                if self.commands.send(command).await.is_err() {
                    tracing::warn!("intense fetch command dropped, no handler is running");
                }
            }
            None => tracing::warn!(
                payload = %String::from_utf8_lossy(payload),
                "unknown intense fetch command"
            ),
        }
    }
}
