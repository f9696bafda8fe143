//! SMS PDU codec (3GPP TS 23.040) for PDU-mode modems.
//!
//! Decodes the SMS-DELIVER PDUs returned by `AT+CMGR` and builds SMS-SUBMIT PDUs for
//! `AT+CMGS`. Only the pieces the bridge needs are implemented: default alphabet,
//! 8-bit and UCS2 data coding, and the concatenation information elements.

use chrono::{DateTime, FixedOffset, NaiveDate};

use super::gsm7;
use super::Concatenation;
use crate::errors::{ModemError, PduError};

/// Information element: concatenated short message, 8-bit reference
const IEI_CONCAT_8: u8 = 0x00;
/// Information element: concatenated short message, 16-bit reference
const IEI_CONCAT_16: u8 = 0x08;

const SINGLE_GSM7_SEPTETS: usize = 160;
const PART_GSM7_SEPTETS: usize = 153;
const SINGLE_UCS2_UNITS: usize = 70;
const PART_UCS2_UNITS: usize = 67;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alphabet {
    Gsm7,
    EightBit,
    Ucs2,
}

impl Alphabet {
    fn from_dcs(dcs: u8) -> Self {
        let by_bits = |bits: u8| match bits & 0x03 {
            1 => Alphabet::EightBit,
            2 => Alphabet::Ucs2,
            _ => Alphabet::Gsm7,
        };
        match dcs & 0xF0 {
            // general data coding, with or without auto-deletion
            0x00..=0x70 => by_bits(dcs >> 2),
            0xC0 | 0xD0 => Alphabet::Gsm7,
            0xE0 => Alphabet::Ucs2,
            0xF0 if dcs & 0x04 != 0 => Alphabet::EightBit,
            _ => Alphabet::Gsm7,
        }
    }
}

/// A decoded SMS-DELIVER.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliverPdu {
    pub sender: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub text: String,
    pub concatenation: Option<Concatenation>,
}

/// One SMS-SUBMIT ready for `AT+CMGS=<tpdu_len>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitPdu {
    /// Hex PDU including the leading `00` (use the SIM's SMSC)
    pub hex: String,
    /// Octet length excluding the SMSC field
    pub tpdu_len: usize,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self, what: &'static str) -> Result<u8, PduError> {
        let b = *self.data.get(self.pos).ok_or(PduError::Truncated(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], PduError> {
        let end = self.pos + n;
        let slice = self.data.get(self.pos..end).ok_or(PduError::Truncated(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

fn from_hex(hex: &str) -> Result<Vec<u8>, PduError> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return Err(PduError::InvalidHex);
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or(PduError::InvalidHex)
        })
        .collect()
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect()
}

fn swapped_digits(octets: &[u8], digits: usize) -> String {
    let mut out = String::with_capacity(digits);
    for &b in octets {
        for nibble in [b & 0x0F, b >> 4] {
            if out.len() == digits {
                break;
            }
            match nibble {
                0..=9 => out.push((b'0' + nibble) as char),
                0x0A => out.push('*'),
                0x0B => out.push('#'),
                0x0C..=0x0E => out.push((b'a' + nibble - 0x0C) as char),
                _ => {}
            }
        }
    }
    out
}

fn bcd(b: u8) -> u32 {
    ((b & 0x0F) as u32) * 10 + (b >> 4) as u32
}

fn decode_timestamp(raw: &[u8]) -> Option<DateTime<FixedOffset>> {
    let &[yy, mo, dd, hh, mi, ss, tz] = raw else {
        return None;
    };
    // the sign lives in bit 3 of the first (low) semi-octet
    let tz_sign = if tz & 0x08 != 0 { -1 } else { 1 };
    let quarters = ((tz & 0x07) as i32) * 10 + (tz >> 4) as i32;
    let offset = FixedOffset::east_opt(tz_sign * quarters * 15 * 60)?;
    NaiveDate::from_ymd_opt(2000 + bcd(yy) as i32, bcd(mo), bcd(dd))?
        .and_hms_opt(bcd(hh), bcd(mi), bcd(ss))?
        .and_local_timezone(offset)
        .single()
}

fn decode_address(cur: &mut Cursor<'_>) -> Result<String, PduError> {
    let digits = cur.byte("address length")? as usize;
    let toa = cur.byte("type of address")?;
    let octets = cur.take(digits.div_ceil(2), "address")?;
    match toa & 0x70 {
        // alphanumeric sender: length counts semi-octets of packed septets
        0x50 => Ok(gsm7::decode(&gsm7::unpack(octets, digits * 4 / 7))),
        0x10 => Ok(format!("+{}", swapped_digits(octets, digits))),
        _ => Ok(swapped_digits(octets, digits)),
    }
}

fn parse_concatenation(header: &[u8]) -> Option<Concatenation> {
    let mut i = 0;
    while i + 1 < header.len() {
        let (iei, len) = (header[i], header[i + 1] as usize);
        let data = header.get(i + 2..i + 2 + len)?;
        match (iei, data) {
            (IEI_CONCAT_8, [reference, total, part]) => {
                return Some(Concatenation {
                    reference: *reference as u16,
                    part_index: *part,
                    total_parts: *total,
                })
            }
            (IEI_CONCAT_16, [hi, lo, total, part]) => {
                return Some(Concatenation {
                    reference: u16::from_be_bytes([*hi, *lo]),
                    part_index: *part,
                    total_parts: *total,
                })
            }
            _ => {}
        }
        i += 2 + len;
    }
    None
}

/// Decode an SMS-DELIVER PDU as printed by `AT+CMGR` in PDU mode (SMSC field included).
pub fn decode_deliver(hex: &str) -> Result<DeliverPdu, PduError> {
    let data = from_hex(hex)?;
    let mut cur = Cursor { data: &data, pos: 0 };

    let smsc_len = cur.byte("smsc length")? as usize;
    cur.take(smsc_len, "smsc")?;

    let first = cur.byte("first octet")?;
    if first & 0x03 != 0x00 {
        return Err(PduError::UnsupportedType(first & 0x03));
    }
    let has_udh = first & 0x40 != 0;

    let sender = decode_address(&mut cur)?;
    let _pid = cur.byte("protocol identifier")?;
    let alphabet = Alphabet::from_dcs(cur.byte("data coding scheme")?);
    let timestamp = decode_timestamp(cur.take(7, "timestamp")?);
    let udl = cur.byte("user data length")? as usize;
    let ud = cur.rest();

    let (header, header_octets) = if has_udh {
        let udhl = *ud.first().ok_or(PduError::Truncated("user data header"))? as usize;
        let header = ud.get(1..1 + udhl).ok_or(PduError::Truncated("user data header"))?;
        (header, udhl + 1)
    } else {
        (&[][..], 0)
    };
    let concatenation = parse_concatenation(header);

    let text = match alphabet {
        Alphabet::Gsm7 => {
            // the header plus fill bits occupy whole septets at the front
            let skip = (header_octets * 8).div_ceil(7);
            let septets = gsm7::unpack(ud, udl);
            gsm7::decode(septets.get(skip..).unwrap_or_default())
        }
        Alphabet::Ucs2 => {
            let body = ud.get(header_octets..udl.min(ud.len())).unwrap_or_default();
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        Alphabet::EightBit => ud
            .get(header_octets..udl.min(ud.len()))
            .unwrap_or_default()
            .iter()
            .map(|&b| b as char)
            .collect(),
    };

    Ok(DeliverPdu {
        sender,
        timestamp,
        text,
        concatenation,
    })
}

fn encode_address(number: &str) -> Result<Vec<u8>, ModemError> {
    let (toa, digits) = match number.strip_prefix('+') {
        Some(rest) => (0x91u8, rest),
        None => (0x81u8, number),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ModemError::Encoding(format!(
            "destination {:?} is not a phone number",
            number
        )));
    }
    let mut out = vec![digits.len() as u8, toa];
    for pair in digits.as_bytes().chunks(2) {
        let lo = pair[0] - b'0';
        let hi = pair.get(1).map(|d| d - b'0').unwrap_or(0x0F);
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Split `septets` into chunks of at most `max`, never separating an escape from its code.
fn split_septets(septets: &[u8], max: usize) -> Vec<Vec<u8>> {
    let mut parts = Vec::new();
    let mut current = Vec::with_capacity(max);
    let mut i = 0;
    while i < septets.len() {
        let width = if septets[i] == gsm7::ESCAPE { 2 } else { 1 };
        if current.len() + width > max {
            parts.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(&septets[i..(i + width).min(septets.len())]);
        i += width;
    }
    if !current.is_empty() || parts.is_empty() {
        parts.push(current);
    }
    parts
}

/// Split UTF-16 `units` into chunks of at most `max`, keeping surrogate pairs whole.
fn split_units(units: &[u16], max: usize) -> Vec<Vec<u16>> {
    let mut parts = Vec::new();
    let mut current = Vec::with_capacity(max);
    let mut i = 0;
    while i < units.len() {
        let width = if (0xD800..0xDC00).contains(&units[i]) { 2 } else { 1 };
        if current.len() + width > max {
            parts.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(&units[i..(i + width).min(units.len())]);
        i += width;
    }
    if !current.is_empty() || parts.is_empty() {
        parts.push(current);
    }
    parts
}

fn concat_header(reference: u8, total: u8, part: u8) -> [u8; 6] {
    [0x05, IEI_CONCAT_8, 0x03, reference, total, part]
}

fn submit(address: &[u8], dcs: u8, udh: bool, udl: usize, ud: &[u8]) -> SubmitPdu {
    let mut tpdu = Vec::with_capacity(8 + address.len() + ud.len());
    tpdu.push(if udh { 0x41 } else { 0x01 });
    tpdu.push(0x00); // message reference assigned by the modem
    tpdu.extend_from_slice(address);
    tpdu.push(0x00);
    tpdu.push(dcs);
    tpdu.push(udl as u8);
    tpdu.extend_from_slice(ud);
    SubmitPdu {
        hex: format!("00{}", to_hex(&tpdu)),
        tpdu_len: tpdu.len(),
    }
}

/// Build the SMS-SUBMIT PDUs for `text`, splitting into a concatenated message when it
/// does not fit one SMS. `reference` identifies the parts of one concatenated message.
pub fn encode_submit(number: &str, text: &str, reference: u8) -> Result<Vec<SubmitPdu>, ModemError> {
    let address = encode_address(number)?;

    if let Some(septets) = gsm7::encode(text) {
        if septets.len() <= SINGLE_GSM7_SEPTETS {
            let ud = gsm7::pack(&septets, 0);
            return Ok(vec![submit(&address, 0x00, false, septets.len(), &ud)]);
        }
        let chunks = split_septets(&septets, PART_GSM7_SEPTETS);
        let total = u8::try_from(chunks.len())
            .map_err(|_| ModemError::Encoding("message needs more than 255 parts".into()))?;
        return Ok(chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut ud = concat_header(reference, total, i as u8 + 1).to_vec();
                // six header octets are 48 bits; one fill bit aligns text to septet 7
                ud.extend(gsm7::pack(chunk, 1));
                submit(&address, 0x00, true, 7 + chunk.len(), &ud)
            })
            .collect());
    }

    let units: Vec<u16> = text.encode_utf16().collect();
    let as_bytes = |units: &[u16]| -> Vec<u8> { units.iter().flat_map(|u| u.to_be_bytes()).collect() };
    if units.len() <= SINGLE_UCS2_UNITS {
        let ud = as_bytes(&units);
        return Ok(vec![submit(&address, 0x08, false, ud.len(), &ud)]);
    }
    let chunks = split_units(&units, PART_UCS2_UNITS);
    let total = u8::try_from(chunks.len())
        .map_err(|_| ModemError::Encoding("message needs more than 255 parts".into()))?;
    Ok(chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut ud = concat_header(reference, total, i as u8 + 1).to_vec();
            ud.extend(as_bytes(chunk));
            submit(&address, 0x08, true, ud.len(), &ud)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_plain_deliver() {
        let pdu = decode_deliver(
            "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37",
        )
        .unwrap();
        assert_eq!(pdu.sender, "27838890001");
        assert_eq!(pdu.text, "hellohello");
        assert!(pdu.concatenation.is_none());
        let ts = pdu.timestamp.unwrap();
        assert_eq!(ts.to_rfc3339(), "2099-03-29T15:16:59+02:00");
    }

    #[test]
    fn test_decodes_concatenated_part_with_8bit_reference() {
        let pdu = decode_deliver(
            "00440A9194515521430000421031214365000C050003070202AE6F399B0C",
        )
        .unwrap();
        assert_eq!(pdu.sender, "+4915551234");
        assert_eq!(pdu.text, "World");
        assert_eq!(
            pdu.concatenation,
            Some(Concatenation {
                reference: 7,
                part_index: 2,
                total_parts: 2
            })
        );
        assert_eq!(
            pdu.timestamp.unwrap().to_rfc3339(),
            "2024-01-13T12:34:56+00:00"
        );
    }

    #[test]
    fn test_decodes_concatenated_part_with_16bit_reference() {
        let pdu = decode_deliver("00440A9194515521430000421031214365000A060804012C0301C834").unwrap();
        assert_eq!(pdu.text, "Hi");
        assert_eq!(
            pdu.concatenation,
            Some(Concatenation {
                reference: 0x012C,
                part_index: 1,
                total_parts: 3
            })
        );
    }

    #[test]
    fn test_rejects_status_report() {
        // first octet 0x06 = SMS-STATUS-REPORT
        let err = decode_deliver("0006").unwrap_err();
        assert_eq!(err, PduError::UnsupportedType(0x02));
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert_eq!(decode_deliver("0G").unwrap_err(), PduError::InvalidHex);
        assert_eq!(decode_deliver("000").unwrap_err(), PduError::InvalidHex);
    }

    #[test]
    fn test_truncated_pdu_is_error() {
        assert!(matches!(
            decode_deliver("0004"),
            Err(PduError::Truncated(_))
        ));
    }

    #[test]
    fn test_encodes_single_gsm7_submit() {
        let pdus = encode_submit("+46708251358", "hellohello", 0).unwrap();
        assert_eq!(pdus.len(), 1);
        assert_eq!(pdus[0].hex, "0001000B916407281553F800000AE8329BFD4697D9EC37");
        assert_eq!(pdus[0].tpdu_len, (pdus[0].hex.len() - 2) / 2);
    }

    #[test]
    fn test_rejects_non_numeric_destination() {
        assert!(matches!(
            encode_submit("alice", "hi", 0),
            Err(ModemError::Encoding(_))
        ));
    }

    #[test]
    fn test_long_gsm7_text_is_split_with_headers() {
        let text = "x".repeat(200);
        let pdus = encode_submit("12345", &text, 0x2A).unwrap();
        assert_eq!(pdus.len(), 2);
        for (i, pdu) in pdus.iter().enumerate() {
            // first octet has UDHI set
            assert!(pdu.hex.starts_with("0041"));
            let header = format!("0500032A02{:02X}", i + 1);
            assert!(pdu.hex.contains(&header), "{} lacks {}", pdu.hex, header);
        }
    }

    #[test]
    fn test_unicode_text_uses_ucs2() {
        let pdus = encode_submit("+1555", "hi 🙂", 0).unwrap();
        assert_eq!(pdus.len(), 1);
        // DCS 0x08, UDL 10 octets: h, i, space and a surrogate pair
        assert!(pdus[0].hex.contains("00080A"));
        assert!(pdus[0].hex.ends_with("006800690020D83DDE42"));
    }

    #[test]
    fn test_split_keeps_escape_pairs_together() {
        let septets = gsm7::encode(&format!("{}€", "a".repeat(152))).unwrap();
        let parts = split_septets(&septets, PART_GSM7_SEPTETS);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 152);
        assert_eq!(parts[1], vec![gsm7::ESCAPE, 0x65]);
    }

    #[test]
    fn test_split_keeps_surrogates_together() {
        let mut units: Vec<u16> = "a".repeat(66).encode_utf16().collect();
        units.extend("🙂".encode_utf16());
        let parts = split_units(&units, PART_UCS2_UNITS);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 66);
        assert_eq!(parts[1].len(), 2);
    }
}
