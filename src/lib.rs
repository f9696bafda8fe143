//! # sms2mqtt - SMS Modem to MQTT Bridge
//!
//! sms2mqtt connects a GSM/LTE modem to an MQTT broker. Text messages received by the
//! modem are published as JSON, and JSON requests published on a topic are sent as SMS.
//!
//! ## Features
//!
//! - **Multi-part SMS**: concatenated messages are reassembled in part order, whatever
//!   the arrival order, with abandoned partials expired after a configurable window.
//! - **PDU mode**: GSM 7-bit and UCS2 encoding, long outgoing texts split automatically.
//! - **Resilient MQTT**: automatic reconnect with bounded backoff and resubscription.
//! - **Layered configuration**: TOML file, environment variables and CLI flags.
//! - **Ordered shutdown**: the broker connection is closed before the modem is released.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sms2mqtt::bridge::Bridge;
//! use sms2mqtt::config::Config;
//! use sms2mqtt::lifecycle::{self, Shutdown};
//! use sms2mqtt::modem::ModemHandle;
//! use sms2mqtt::mqtt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let (modem, inbound) = ModemHandle::connect(
//!         &config.modem.device,
//!         config.modem.baud_rate,
//!         config.modem.pin_code.as_deref(),
//!     )
//!     .await?;
//!
//!     let shutdown = Shutdown::new();
//!     lifecycle::spawn_signal_listener(shutdown.clone());
//!     let (publisher, supervisor, outbound) = mqtt::start(&config.mqtt, shutdown.clone());
//!
//!     let bridge = Bridge::new(&config.mqtt.prefix, &config.reassembly, modem, publisher);
//!     bridge.announce_ready(&config.modem.device, config.modem.baud_rate).await;
//!     let bridge = bridge
//!         .run(inbound, outbound, config.reassembly.sweep_interval(), shutdown.clone())
//!         .await;
//!
//!     lifecycle::stop(&shutdown, supervisor, bridge.into_modem()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - Message translation, topics, payloads and multi-part reassembly
//! - [`modem`] - AT command driver and SMS PDU codec
//! - [`mqtt`] - Broker connection supervisor and publisher
//! - [`config`] - Configuration loading and layering
//! - [`lifecycle`] - Stop flag, signals and ordered shutdown
//! - [`errors`] - Error types
//! - [`logutil`] - Log formatting helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   fragments    ┌─────────────────┐   publish    ┌──────────┐
//! │  Modem driver   │ ─────────────▶ │     Bridge      │ ───────────▶ │  Broker  │
//! │ (blocking task) │ ◀───────────── │ (+ reassembly)  │ ◀─────────── │          │
//! └─────────────────┘   send SMS     └─────────────────┘  send topic  └──────────┘
//!                                             ▲                  (supervisor task)
//! ```

pub mod bridge;
pub mod config;
pub mod errors;
pub mod lifecycle;
pub mod logutil;
pub mod modem;
pub mod mqtt;
