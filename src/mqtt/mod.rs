//! # MQTT Connection Module
//!
//! Owns the broker connection. A supervisor task drives the `rumqttc` event loop,
//! resubscribes to the `send` topic on every (re)connect, forwards its payloads to the
//! bridge and spaces reconnect attempts with [`ReconnectBackoff`]. Publishing goes
//! through [`MqttPublisher`], a cheap clone of the client usable from any task.
//!
//! ```rust,no_run
//! use sms2mqtt::config::MqttConfig;
//! use sms2mqtt::lifecycle::Shutdown;
//! use sms2mqtt::mqtt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = Shutdown::new();
//!     let (publisher, supervisor, mut send_requests) =
//!         mqtt::start(&MqttConfig::default(), shutdown.clone());
//!     tokio::spawn(async move {
//!         while let Some(payload) = send_requests.recv().await {
//!             println!("send request: {} bytes", payload.len());
//!         }
//!     });
//!     shutdown.trigger();
//!     supervisor.join().await;
//!     drop(publisher);
//! }
//! ```

pub mod backoff;

pub use backoff::ReconnectBackoff;

use log::{debug, error, info, trace, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bridge::topics::{topic_for, TopicName};
use crate::bridge::EventPublisher;
use crate::config::MqttConfig;
use crate::errors::BusError;
use crate::lifecycle::Shutdown;

/// Bounded request queue between publishers and the event loop
const REQUEST_CAPACITY: usize = 64;
/// Upper bound on flushing the final DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive().max(Duration::from_secs(5)));
    options.set_clean_session(true);
    if let Some((username, password)) = config.credentials() {
        options.set_credentials(username, password);
    }
    options
}

/// Publishing side of the connection.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub async fn publish_json(&self, topic: &str, payload: String) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.into_bytes())
            .await?;
        Ok(())
    }
}

impl EventPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        self.publish_json(topic, payload).await
    }
}

/// Join handle plus a read-only view of the connection state.
pub struct SupervisorHandle {
    state: watch::Receiver<ConnectionState>,
    worker: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait for the supervisor to disconnect and exit. Only returns after `shutdown`
    /// has been triggered.
    pub async fn join(self) {
        if let Err(e) = self.worker.await {
            error!("MQTT supervisor task failed: {}", e);
        }
    }
}

/// Start the supervisor. Returns the publisher, the handle and the stream of raw
/// payloads received on the `send` topic.
pub fn start(
    config: &MqttConfig,
    shutdown: Shutdown,
) -> (MqttPublisher, SupervisorHandle, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (client, eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);
    let (forward_tx, forward_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    info!(
        "Connecting to MQTT broker {}:{} as {} (prefix {:?})",
        config.host, config.port, config.client_id, config.prefix
    );
    let supervisor = ConnectionSupervisor {
        eventloop,
        client: client.clone(),
        send_topic: topic_for(&config.prefix, TopicName::Send.as_str()),
        forward: forward_tx,
        shutdown,
        state: state_tx,
        backoff: ReconnectBackoff::default(),
    };
    let worker = tokio::spawn(supervisor.run());

    (
        MqttPublisher { client },
        SupervisorHandle {
            state: state_rx,
            worker,
        },
        forward_rx,
    )
}

struct ConnectionSupervisor {
    eventloop: EventLoop,
    client: AsyncClient,
    send_topic: String,
    forward: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: Shutdown,
    state: watch::Sender<ConnectionState>,
    backoff: ReconnectBackoff,
}

impl ConnectionSupervisor {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    async fn run(mut self) {
        debug!("MQTT supervisor started");
        self.set_state(ConnectionState::Connecting);

        while !self.shutdown.is_triggered() {
            let polled = tokio::select! {
                polled = self.eventloop.poll() => polled,
                _ = self.shutdown.wait() => break,
            };
            match polled {
                Ok(event) => self.handle_event(event),
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    self.set_state(ConnectionState::Disconnected);
                    let delay = self.backoff.next_delay();
                    debug!("Reconnecting to MQTT broker in {:?}", delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.wait() => break,
                    }
                    self.set_state(ConnectionState::Connecting);
                }
            }
        }

        let was_connected = self.is_connected();
        self.set_state(ConnectionState::ShuttingDown);
        if was_connected {
            self.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Mqtt... DOWN");
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!("Connected to MQTT Broker with result code: {:?}", ack.code);
                if ack.code != ConnectReturnCode::Success {
                    return;
                }
                self.set_state(ConnectionState::Connected);
                self.backoff.reset();
                match self.client.try_subscribe(self.send_topic.as_str(), QoS::AtLeastOnce) {
                    Ok(()) => info!("Subscribing to {}", self.send_topic),
                    Err(e) => error!("Failed to subscribe to {}: {}", self.send_topic, e),
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                for code in &ack.return_codes {
                    match code {
                        SubscribeReasonCode::Success(qos) => {
                            info!("Subscribed with QoS {:?}", qos)
                        }
                        SubscribeReasonCode::Failure => {
                            error!("Broker rejected subscription (packet {})", ack.pkid)
                        }
                    }
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                if publish.topic != self.send_topic {
                    debug!("Ignoring message on {}", publish.topic);
                    return;
                }
                if self.forward.send(publish.payload.to_vec()).is_err() {
                    warn!("Bridge is gone, dropping send request");
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker sent disconnect");
            }
            Event::Incoming(packet) => trace!("MQTT incoming {:?}", packet),
            Event::Outgoing(outgoing) => trace!("MQTT outgoing {:?}", outgoing),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue MQTT disconnect: {}", e);
            return;
        }
        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            warn!("MQTT disconnect did not complete in {:?}", DISCONNECT_GRACE);
        }
    }
}
