//! Line-oriented AT command channel for PDU-mode GSM modems.
//!
//! The channel owns any `Read + Write` port (a `serialport::SerialPort` in production,
//! a scripted buffer in tests). Reads are expected to time out quickly; a timed out read
//! is not an error, it just means no bytes are waiting.

use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use super::pdu::{self, DeliverPdu, SubmitPdu};
use crate::errors::ModemError;
use crate::logutil::escape_log;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Network submission can take a while on weak coverage
pub const SEND_TIMEOUT: Duration = Duration::from_secs(60);
const PROMPT_TIMEOUT: Duration = Duration::from_secs(10);

const CTRL_Z: u8 = 0x1A;

/// Unsolicited result codes the driver acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Urc {
    /// `+CMTI: "SM",3`: a message was stored at `index`
    Stored { memory: String, index: u32 },
    /// `+CMT: ,<len>` followed by the PDU line
    Delivered(String),
    Other(String),
}

fn is_final(line: &str) -> bool {
    line == "OK"
        || line == "ERROR"
        || line.starts_with("+CME ERROR")
        || line.starts_with("+CMS ERROR")
}

fn is_urc(line: &str) -> bool {
    line.starts_with("+CMTI:")
        || line.starts_with("+CMT:")
        || line.starts_with("+CDSI:")
        || line == "RING"
}

fn parse_cmti(line: &str) -> Option<Urc> {
    let rest = line.strip_prefix("+CMTI:")?.trim();
    let (memory, index) = rest.split_once(',')?;
    Some(Urc::Stored {
        memory: memory.trim().trim_matches('"').to_string(),
        index: index.trim().parse().ok()?,
    })
}

pub struct AtChannel<P> {
    port: P,
    buf: Vec<u8>,
    urcs: VecDeque<String>,
    /// Memory last selected with `AT+CPMS`
    read_storage: Option<String>,
}

impl<P: Read + Write> AtChannel<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            buf: Vec::with_capacity(512),
            urcs: VecDeque::new(),
            read_storage: None,
        }
    }

    /// One read from the port. `Ok(false)` when nothing arrived before the port timeout.
    fn fill(&mut self) -> Result<bool, ModemError> {
        let mut chunk = [0u8; 256];
        match self.port.read(&mut chunk) {
            Ok(0) => Ok(false),
            Ok(n) => {
                trace!("RX {}", escape_log(&String::from_utf8_lossy(&chunk[..n])));
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(false),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(ModemError::Io(e)),
        }
    }

    fn take_buffered_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buf.iter().position(|&b| b == b'\n')?;
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
    }

    /// Next non-empty line, or `None` if `timeout` passes first.
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, ModemError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.take_buffered_line() {
                return Ok(Some(line));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.fill()?;
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), ModemError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Run `cmd` and collect the intermediate lines up to `OK`.
    /// URCs that arrive meanwhile are queued for [`AtChannel::next_urc`].
    pub fn command(&mut self, cmd: &str, timeout: Duration) -> Result<Vec<String>, ModemError> {
        debug!("AT> {}", escape_log(cmd));
        self.write_all(format!("{}\r", cmd).as_bytes())?;
        self.collect_response(cmd, timeout)
    }

    fn collect_response(&mut self, cmd: &str, timeout: Duration) -> Result<Vec<String>, ModemError> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(line) = self.read_line(remaining)? else {
                return Err(ModemError::Timeout(cmd.to_string()));
            };
            if line == cmd {
                continue; // echo
            }
            if is_final(&line) {
                debug!("AT< {}", escape_log(&line));
                if line == "OK" {
                    return Ok(lines);
                }
                return Err(ModemError::Command {
                    command: cmd.to_string(),
                    response: line,
                });
            }
            if is_urc(&line) {
                self.queue_urc(line)?;
                continue;
            }
            lines.push(line);
        }
    }

    fn queue_urc(&mut self, line: String) -> Result<(), ModemError> {
        if line.starts_with("+CMT:") {
            // the PDU follows on its own line
            if let Some(pdu) = self.read_line(COMMAND_TIMEOUT)? {
                self.urcs.push_back(line);
                self.urcs.push_back(pdu);
                return Ok(());
            }
        }
        self.urcs.push_back(line);
        Ok(())
    }

    /// Next unsolicited result code, waiting up to `timeout` for one to arrive.
    pub fn next_urc(&mut self, timeout: Duration) -> Result<Option<Urc>, ModemError> {
        if self.urcs.is_empty() {
            match self.read_line(timeout)? {
                Some(line) => self.queue_urc(line)?,
                None => return Ok(None),
            }
        }
        let Some(line) = self.urcs.pop_front() else {
            return Ok(None);
        };
        if let Some(stored) = parse_cmti(&line) {
            return Ok(Some(stored));
        }
        if line.starts_with("+CMT:") {
            if let Some(pdu) = self.urcs.pop_front() {
                return Ok(Some(Urc::Delivered(pdu)));
            }
        }
        Ok(Some(Urc::Other(line)))
    }

    /// Bring the modem into PDU mode with new-message indications, unlocking the SIM if needed.
    pub fn init(&mut self, pin: Option<&str>) -> Result<(), ModemError> {
        let mut synced = false;
        for attempt in 1..=3 {
            match self.command("AT", Duration::from_secs(2)) {
                Ok(_) => {
                    synced = true;
                    break;
                }
                Err(e) => debug!("AT sync attempt {} failed: {}", attempt, e),
            }
        }
        if !synced {
            return Err(ModemError::Connect("modem does not answer AT".into()));
        }

        self.command("ATZ", COMMAND_TIMEOUT)?;
        self.command("ATE0", COMMAND_TIMEOUT)?;
        if let Err(e) = self.command("AT+CMEE=1", COMMAND_TIMEOUT) {
            debug!("Extended error reporting unavailable: {}", e);
        }

        self.unlock_sim(pin)?;

        self.command("AT+CMGF=0", COMMAND_TIMEOUT)
            .map_err(|e| ModemError::Connect(format!("PDU mode not supported: {}", e)))?;
        if let Err(e) = self.command("AT+CNMI=2,1,0,0,0", COMMAND_TIMEOUT) {
            warn!("Could not enable new message indications: {}", e);
        }
        Ok(())
    }

    fn unlock_sim(&mut self, pin: Option<&str>) -> Result<(), ModemError> {
        let status = self
            .command("AT+CPIN?", COMMAND_TIMEOUT)?
            .into_iter()
            .find_map(|l| l.strip_prefix("+CPIN:").map(|s| s.trim().to_string()))
            .unwrap_or_else(|| "READY".to_string());
        match status.as_str() {
            "READY" => Ok(()),
            "SIM PIN" => {
                let pin = pin.ok_or_else(|| ModemError::Pin("SIM requires a PIN".into()))?;
                self.command(&format!("AT+CPIN=\"{}\"", pin), COMMAND_TIMEOUT)
                    .map_err(|e| ModemError::Pin(e.to_string()))?;
                debug!("SIM unlocked");
                Ok(())
            }
            other => Err(ModemError::Pin(format!("SIM state {}", other))),
        }
    }

    fn wait_for_prompt(&mut self) -> Result<(), ModemError> {
        let deadline = Instant::now() + PROMPT_TIMEOUT;
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'>') {
                self.buf.drain(..=pos);
                if self.buf.first() == Some(&b' ') {
                    self.buf.remove(0);
                }
                return Ok(());
            }
            if let Some(line) = self.take_buffered_line() {
                if is_final(&line) {
                    return Err(ModemError::Transmit(line));
                }
                if is_urc(&line) {
                    self.queue_urc(line)?;
                }
                continue;
            }
            if Instant::now() >= deadline {
                return Err(ModemError::Timeout("AT+CMGS prompt".into()));
            }
            self.fill()?;
        }
    }

    /// Submit one PDU. Any modem-side refusal is a [`ModemError::Transmit`].
    pub fn send_pdu(&mut self, pdu: &SubmitPdu) -> Result<(), ModemError> {
        let cmd = format!("AT+CMGS={}", pdu.tpdu_len);
        debug!("AT> {}", cmd);
        self.write_all(format!("{}\r", cmd).as_bytes())?;
        self.wait_for_prompt()?;

        let mut body = pdu.hex.clone().into_bytes();
        body.push(CTRL_Z);
        self.write_all(&body)?;

        match self.collect_response(&cmd, SEND_TIMEOUT) {
            Ok(_) => Ok(()),
            Err(ModemError::Command { response, .. }) => Err(ModemError::Transmit(response)),
            Err(e) => Err(e),
        }
    }

    /// Encode and submit `text`, as several parts when it is too long for one SMS.
    pub fn send_sms(&mut self, number: &str, text: &str, reference: u8) -> Result<(), ModemError> {
        for part in pdu::encode_submit(number, text, reference)? {
            self.send_pdu(&part)?;
        }
        Ok(())
    }

    /// Make `memory` the storage that `AT+CMGR`/`AT+CMGD` act on.
    /// A modem that rejects the selection keeps its current storage.
    fn select_storage(&mut self, memory: &str) {
        if memory.is_empty() || self.read_storage.as_deref() == Some(memory) {
            return;
        }
        match self.command(&format!("AT+CPMS=\"{}\"", memory), COMMAND_TIMEOUT) {
            Ok(_) => self.read_storage = Some(memory.to_string()),
            Err(e) => warn!("Could not select message storage {}: {}", memory, e),
        }
    }

    /// Read the message stored at `index` in `memory` and delete it.
    pub fn read_stored(
        &mut self,
        memory: &str,
        index: u32,
    ) -> Result<Option<DeliverPdu>, ModemError> {
        self.select_storage(memory);
        let lines = self.command(&format!("AT+CMGR={}", index), COMMAND_TIMEOUT)?;
        let decoded = lines
            .iter()
            .skip_while(|l| !l.starts_with("+CMGR:"))
            .nth(1)
            .map(|hex| pdu::decode_deliver(hex));
        if let Err(e) = self.command(&format!("AT+CMGD={}", index), COMMAND_TIMEOUT) {
            warn!("Failed to delete stored message {}: {}", index, e);
        }
        match decoded {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => {
                warn!("Skipping undecodable message at index {}: {}", index, e);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
