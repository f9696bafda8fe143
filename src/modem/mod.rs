//! # GSM Modem Driver Module
//!
//! Talks to a GSM/LTE modem over a serial port using AT commands in PDU mode.
//!
//! ## Features
//!
//! - **Serial Communication**: USB/UART modems via `serialport`
//! - **PDU Codec**: default alphabet, UCS2 and concatenated messages ([`pdu`], [`gsm7`])
//! - **SIM Unlock**: optional PIN entry during init
//! - **Event Delivery**: every received message fragment is sent on a channel
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sms2mqtt::modem::ModemHandle;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (modem, mut inbound) = ModemHandle::connect("/dev/ttyUSB2", 115200, None).await?;
//!     modem.send("+15551234567", "hello").await?;
//!     if let Some(fragment) = inbound.recv().await {
//!         println!("{}: {}", fragment.sender, fragment.text);
//!     }
//!     modem.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Threading
//!
//! The serial port is owned by a single blocking task. Outgoing sends are queued to it
//! as commands and answered through a oneshot channel; between commands it waits for
//! unsolicited `+CMTI`/`+CMT` indications in short bounded reads.

pub mod at;
pub mod gsm7;
pub mod pdu;

use chrono::{DateTime, FixedOffset, Local};
use log::{debug, error, info, warn};
use std::io::{Read, Write};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::errors::ModemError;
use crate::logutil::escape_log;
use at::{AtChannel, Urc};
use pdu::DeliverPdu;

/// Wait between command checks while listening for unsolicited codes
const URC_POLL: Duration = Duration::from_millis(200);

/// Concatenation header of one part of a multi-part SMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Concatenation {
    pub reference: u16,
    /// 1-based
    pub part_index: u8,
    pub total_parts: u8,
}

/// One received SMS fragment, as delivered by the modem.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub sender: String,
    pub timestamp: DateTime<FixedOffset>,
    pub text: String,
    pub concatenation: Option<Concatenation>,
}

impl From<DeliverPdu> for IncomingMessage {
    fn from(pdu: DeliverPdu) -> Self {
        IncomingMessage {
            sender: pdu.sender,
            timestamp: pdu.timestamp.unwrap_or_else(|| Local::now().fixed_offset()),
            text: pdu.text,
            concatenation: pdu.concatenation,
        }
    }
}

/// Commands for the driver task
#[derive(Debug)]
enum ModemCommand {
    Send {
        number: String,
        text: String,
        reply: oneshot::Sender<Result<(), ModemError>>,
    },
    Close,
}

/// Handle to a running modem driver. Cheap to share by reference across tasks.
pub struct ModemHandle {
    commands: mpsc::UnboundedSender<ModemCommand>,
    worker: JoinHandle<()>,
}

impl ModemHandle {
    /// Open `device`, run the init sequence and start the driver.
    /// Fails with [`ModemError::Connect`] or [`ModemError::Pin`] when the modem is unusable.
    pub async fn connect(
        device: &str,
        baud_rate: u32,
        pin: Option<&str>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<IncomingMessage>), ModemError> {
        info!("Initializing modem on {} at {} baud", device, baud_rate);
        let device = device.to_string();
        let pin = pin.map(str::to_string);
        let channel = tokio::task::spawn_blocking(move || {
            let port = open_serial_port(&device, baud_rate)?;
            let mut channel = AtChannel::new(port);
            channel.init(pin.as_deref())?;
            Ok::<_, ModemError>(channel)
        })
        .await
        .map_err(|e| ModemError::Connect(format!("init task failed: {}", e)))??;
        info!("Modem ready");
        Ok(Self::spawn(channel))
    }

    /// Start the driver loop on an already initialized channel.
    pub fn spawn<P>(channel: AtChannel<P>) -> (Self, mpsc::UnboundedReceiver<IncomingMessage>)
    where
        P: Read + Write + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || run_driver(channel, command_rx, inbound_tx));
        (
            ModemHandle {
                commands: command_tx,
                worker,
            },
            inbound_rx,
        )
    }

    /// Transmit one SMS (several parts when long). Waits for the network submission result.
    pub async fn send(&self, number: &str, text: &str) -> Result<(), ModemError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ModemCommand::Send {
                number: number.to_string(),
                text: text.to_string(),
                reply,
            })
            .map_err(|_| ModemError::Closed)?;
        response.await.map_err(|_| ModemError::Closed)?
    }

    /// Stop the driver and release the serial port.
    pub async fn close(self) -> Result<(), ModemError> {
        let _ = self.commands.send(ModemCommand::Close);
        self.worker
            .await
            .map_err(|e| ModemError::Connect(format!("driver task failed: {}", e)))?;
        info!("Modem... DOWN");
        Ok(())
    }
}

#[cfg(feature = "serial")]
fn open_serial_port(device: &str, baud_rate: u32) -> Result<Box<dyn serialport::SerialPort>, ModemError> {
    let mut builder = serialport::new(device, baud_rate).timeout(Duration::from_millis(100));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder
        .open()
        .map_err(|e| ModemError::Connect(format!("failed to open serial port {}: {}", device, e)))?;
    let _ = port.write_data_terminal_ready(true);
    // Drop any boot chatter left in the buffer
    let _ = port.clear(serialport::ClearBuffer::All);
    debug!("Serial port {} opened", device);
    Ok(port)
}

#[cfg(not(feature = "serial"))]
fn open_serial_port(device: &str, _baud_rate: u32) -> Result<std::io::Empty, ModemError> {
    Err(ModemError::Connect(format!(
        "serial support not compiled in, cannot open {}",
        device
    )))
}

fn deliver(inbound: &mpsc::UnboundedSender<IncomingMessage>, pdu: DeliverPdu) {
    debug!(
        "SMS fragment from {} ({:?}): {}",
        pdu.sender,
        pdu.concatenation,
        escape_log(&pdu.text)
    );
    if inbound.send(pdu.into()).is_err() {
        warn!("Inbound channel closed, dropping received SMS");
    }
}

fn run_driver<P: Read + Write>(
    mut channel: AtChannel<P>,
    mut commands: mpsc::UnboundedReceiver<ModemCommand>,
    inbound: mpsc::UnboundedSender<IncomingMessage>,
) {
    info!("Starting modem driver task");
    let mut next_reference: u8 = 0;
    loop {
        match commands.try_recv() {
            Ok(ModemCommand::Send {
                number,
                text,
                reply,
            }) => {
                let result = channel.send_sms(&number, &text, next_reference);
                next_reference = next_reference.wrapping_add(1);
                if let Err(e) = &result {
                    warn!("SMS to {} failed: {}", number, e);
                }
                let _ = reply.send(result);
                continue;
            }
            Ok(ModemCommand::Close) | Err(mpsc::error::TryRecvError::Disconnected) => break,
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        match channel.next_urc(URC_POLL) {
            Ok(Some(Urc::Stored { memory, index })) => {
                debug!("New message stored in {} at {}", memory, index);
                match channel.read_stored(&memory, index) {
                    Ok(Some(pdu)) => deliver(&inbound, pdu),
                    Ok(None) => {}
                    Err(e) => error!("Failed to read stored message {}: {}", index, e),
                }
            }
            Ok(Some(Urc::Delivered(hex))) => match pdu::decode_deliver(&hex) {
                Ok(pdu) => deliver(&inbound, pdu),
                Err(e) => warn!("Skipping undecodable message: {}", e),
            },
            Ok(Some(Urc::Other(line))) => debug!("Ignoring modem line: {}", escape_log(&line)),
            Ok(None) => {}
            Err(e) => {
                error!("Modem read error: {} - continuing operation", e);
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }
    info!("Modem driver task shutting down");
}

#[cfg(test)]
mod tests {
    use super::at::tests::ScriptedPort;
    use super::*;

    #[tokio::test]
    async fn test_stored_message_is_delivered_as_fragment() {
        let mut port = ScriptedPort::new(&[
            "\r\n+CPMS: 1,30,1,30,1,30\r\n\r\nOK\r\n",
            "\r\n+CMGR: 0,,24\r\n00440A9194515521430000421031214365000C050003070202AE6F399B0C\r\n\r\nOK\r\n",
            "\r\nOK\r\n",
        ]);
        port.push_input("\r\n+CMTI: \"SM\",1\r\n");
        let (modem, mut inbound) = ModemHandle::spawn(AtChannel::new(port));

        let fragment = inbound.recv().await.expect("fragment");
        assert_eq!(fragment.sender, "+4915551234");
        assert_eq!(fragment.text, "World");
        assert_eq!(
            fragment.concatenation,
            Some(Concatenation {
                reference: 7,
                part_index: 2,
                total_parts: 2
            })
        );
        modem.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_reports_modem_refusal() {
        let port = ScriptedPort::new(&["\r\n> ", "\r\n+CMS ERROR: 500\r\n"]);
        let (modem, _inbound) = ModemHandle::spawn(AtChannel::new(port));
        let err = modem.send("+1555", "hi").await.unwrap_err();
        assert_eq!(err.reason(), "+CMS ERROR: 500");
        modem.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_is_closed_error() {
        let (modem, _inbound) = ModemHandle::spawn(AtChannel::new(ScriptedPort::new(&[])));
        let commands = modem.commands.clone();
        modem.close().await.unwrap();
        let (reply, _rx) = oneshot::channel();
        assert!(commands
            .send(ModemCommand::Send {
                number: "1".into(),
                text: "x".into(),
                reply,
            })
            .is_err());
    }
}
