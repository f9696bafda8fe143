use thiserror::Error;

/// Errors raised by the modem driver.
#[derive(Debug, Error)]
pub enum ModemError {
    /// The serial device could not be opened or did not answer the init sequence.
    #[error("modem connect failed: {0}")]
    Connect(String),

    /// SIM is locked and no (or a wrong) PIN was supplied.
    #[error("SIM PIN error: {0}")]
    Pin(String),

    /// Wrapper around serial IO errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No final result code arrived in time.
    #[error("timed out waiting for response to {0}")]
    Timeout(String),

    /// The modem answered with ERROR / +CME ERROR / +CMS ERROR.
    #[error("command {command} failed: {response}")]
    Command { command: String, response: String },

    /// Outgoing SMS was rejected. The reason is reported on the bus verbatim.
    #[error("{0}")]
    Transmit(String),

    /// Text could not be encoded into SMS-SUBMIT PDUs.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The driver thread has stopped.
    #[error("modem driver closed")]
    Closed,
}

impl ModemError {
    /// Reason string carried in the `error` bus event.
    pub fn reason(&self) -> String {
        match self {
            ModemError::Transmit(reason) => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// Decoding failures for inbound SMS PDUs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PduError {
    #[error("invalid hex in PDU")]
    InvalidHex,

    #[error("PDU truncated at {0}")]
    Truncated(&'static str),

    #[error("unsupported message type indicator {0:#04x}")]
    UnsupportedType(u8),
}

/// A `send` request that cannot be turned into an SMS.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a JSON object: {0}")]
    Malformed(String),

    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),
}

/// Failures on the MQTT side.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}
