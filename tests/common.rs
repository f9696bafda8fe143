//! Test doubles for the modem and the bus.

use std::sync::{Arc, Mutex};

use chrono::{FixedOffset, TimeZone};
use sms2mqtt::bridge::{EventPublisher, SmsTransmitter};
use sms2mqtt::errors::{BusError, ModemError};
use sms2mqtt::modem::{Concatenation, IncomingMessage};

/// Records every transmit; fails with `failure` when set.
#[derive(Clone, Default)]
pub struct FakeTransmitter {
    pub sent: Arc<Mutex<Vec<(String, String)>>>,
    pub failure: Option<String>,
}

#[allow(dead_code)]
impl FakeTransmitter {
    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl SmsTransmitter for FakeTransmitter {
    async fn transmit(&self, number: &str, text: &str) -> Result<(), ModemError> {
        self.sent
            .lock()
            .unwrap()
            .push((number.to_string(), text.to_string()));
        match &self.failure {
            Some(reason) => Err(ModemError::Transmit(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Records every publish as (topic, parsed JSON).
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub published: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
}

#[allow(dead_code)]
impl RecordingPublisher {
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.published().into_iter().map(|(topic, _)| topic).collect()
    }
}

impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        let value = serde_json::from_str(&payload)?;
        self.published.lock().unwrap().push((topic.to_string(), value));
        Ok(())
    }
}

#[allow(dead_code)]
pub fn fragment(sender: &str, text: &str, concat: Option<(u16, u8, u8)>) -> IncomingMessage {
    IncomingMessage {
        sender: sender.to_string(),
        timestamp: FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 13, 12, 34, 56)
            .unwrap(),
        text: text.to_string(),
        concatenation: concat.map(|(reference, part_index, total_parts)| Concatenation {
            reference,
            part_index,
            total_parts,
        }),
    }
}
