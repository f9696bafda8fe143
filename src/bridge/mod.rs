//! # Bridge Module
//!
//! Translates between modem events and bus messages.
//!
//! - Inbound: fragments from the modem go through the [`ReassemblyTable`]; each
//!   completed message is published once on `P/received`.
//! - Outbound: payloads from `P/send` are validated, handed to the modem, and the outcome
//!   is published on `P/sent` or `P/error`.
//!
//! The modem and the bus are reached through [`SmsTransmitter`] and [`EventPublisher`],
//! so the bridge can be driven without hardware or a broker.

pub mod events;
pub mod reassembly;
pub mod topics;

use log::{debug, error, info, warn};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::ReassemblyConfig;
use crate::errors::{BusError, ModemError, PayloadError};
use crate::lifecycle::Shutdown;
use crate::logutil::escape_log;
use crate::modem::{IncomingMessage, ModemHandle};
pub use events::{BridgeEvent, OutboundRequest};
pub use reassembly::ReassemblyTable;
use topics::Topics;

/// Something that can put an SMS on the air.
pub trait SmsTransmitter {
    fn transmit(
        &self,
        number: &str,
        text: &str,
    ) -> impl Future<Output = Result<(), ModemError>> + Send;
}

/// Something that can publish a JSON payload on a topic.
pub trait EventPublisher {
    fn publish(&self, topic: &str, payload: String)
        -> impl Future<Output = Result<(), BusError>> + Send;
}

impl SmsTransmitter for ModemHandle {
    async fn transmit(&self, number: &str, text: &str) -> Result<(), ModemError> {
        self.send(number, text).await
    }
}

pub struct Bridge<T, P> {
    topics: Topics,
    table: ReassemblyTable,
    modem: T,
    publisher: P,
}

impl<T, P> Bridge<T, P>
where
    T: SmsTransmitter + Send + Sync,
    P: EventPublisher + Send + Sync,
{
    pub fn new(prefix: &str, reassembly: &ReassemblyConfig, modem: T, publisher: P) -> Self {
        Self {
            topics: Topics::new(prefix),
            table: ReassemblyTable::new(reassembly.max_age()),
            modem,
            publisher,
        }
    }

    pub fn table(&self) -> &ReassemblyTable {
        &self.table
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Give back the modem, e.g. to close it after [`Bridge::run`] returned.
    pub fn into_modem(self) -> T {
        self.modem
    }

    /// Publish the startup announcement. Call once, before the run loop.
    pub async fn announce_ready(&self, device: &str, baud_rate: u32) {
        self.publish_event(BridgeEvent::ready(device, baud_rate)).await;
    }

    /// Handle one fragment from the modem.
    pub async fn on_modem_message(&mut self, message: IncomingMessage) {
        let text = match message.concatenation {
            Some(concat) => {
                info!(
                    "Partial message received [{}/{}] from {}",
                    concat.part_index, concat.total_parts, message.sender
                );
                match self.table.add_fragment(
                    concat.reference,
                    concat.part_index,
                    concat.total_parts,
                    &message.text,
                ) {
                    Some(text) => text,
                    None => return,
                }
            }
            None => message.text,
        };
        info!(
            "Message received from {} at {}: {}",
            message.sender,
            message.timestamp,
            escape_log(&text)
        );
        self.publish_event(BridgeEvent::received(&message.sender, &text))
            .await;
    }

    /// Handle one raw payload from the `send` topic. Invalid payloads are logged and dropped.
    pub async fn on_bus_message(&self, payload: &[u8]) -> Result<(), PayloadError> {
        let request = match OutboundRequest::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    "Dropping send request ({}): {}",
                    e,
                    escape_log(&String::from_utf8_lossy(payload))
                );
                return Err(e);
            }
        };

        info!(
            "Sending SMS to {}: {}",
            request.number,
            escape_log(&request.text)
        );
        let event = match self.modem.transmit(&request.number, &request.text).await {
            Ok(()) => {
                info!("SMS sent to {}", request.number);
                BridgeEvent::sent(&request.number, &request.text)
            }
            Err(e) => {
                error!("Failed to send SMS to {}: {}", request.number, e);
                BridgeEvent::error(e.reason())
            }
        };
        self.publish_event(event).await;
        Ok(())
    }

    /// Drop partial messages that outlived the reassembly window.
    pub fn sweep(&mut self) -> usize {
        let evicted = self.table.sweep();
        if evicted > 0 {
            warn!("Discarded {} incomplete multi-part message(s)", evicted);
        }
        evicted
    }

    async fn publish_event(&self, event: BridgeEvent) {
        let topic = self.topics.get(event.topic());
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.topic().as_str(), e);
                return;
            }
        };
        debug!("Publishing to {}: {}", topic, escape_log(&payload));
        if let Err(e) = self.publisher.publish(topic, payload).await {
            error!("Failed to publish to {}: {}", topic, e);
        }
    }

    /// Process inbound fragments and outbound requests until `shutdown` fires.
    /// Returns the bridge so the caller can release the modem afterwards.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<IncomingMessage>,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
        sweep_interval: Duration,
        shutdown: Shutdown,
    ) -> Self {
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbound_open = true;
        let mut outbound_open = true;

        info!("Waiting for new SMS message...");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => break,

                message = inbound.recv(), if inbound_open => match message {
                    Some(message) => self.on_modem_message(message).await,
                    None => {
                        error!("Modem event channel closed");
                        inbound_open = false;
                    }
                },

                payload = outbound.recv(), if outbound_open => match payload {
                    Some(payload) => {
                        // already logged
                        let _ = self.on_bus_message(&payload).await;
                    }
                    None => {
                        warn!("Send request channel closed");
                        outbound_open = false;
                    }
                },

                _ = sweep.tick() => {
                    self.sweep();
                }
            }
        }
        debug!(
            "Bridge loop stopped with {} pending partial message(s)",
            self.table.len()
        );
        self
    }
}
