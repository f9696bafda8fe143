//! GSM 03.38 default alphabet and septet packing.
//!
//! SMS text in the default alphabet is carried as 7-bit septets packed LSB-first into
//! octets. When a user data header precedes the text, the first septet is aligned to a
//! septet boundary by `fill_bits` padding bits.

/// Escape to the extension table.
pub const ESCAPE: u8 = 0x1B;

const BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì',
    'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ',
    'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'',
    '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7',
    '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G',
    'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W',
    'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g',
    'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w',
    'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

const EXTENSION: [(u8, char); 10] = [
    (0x0A, '\u{0c}'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

fn basic_code(ch: char) -> Option<u8> {
    if ch == '\u{1b}' {
        return None;
    }
    BASIC.iter().position(|&c| c == ch).map(|i| i as u8)
}

fn extension_code(ch: char) -> Option<u8> {
    EXTENSION.iter().find(|(_, c)| *c == ch).map(|(code, _)| *code)
}

/// Septets for one character: one for the basic table, two for the extension table.
pub fn char_septets(ch: char) -> Option<Vec<u8>> {
    if let Some(code) = basic_code(ch) {
        Some(vec![code])
    } else {
        extension_code(ch).map(|code| vec![ESCAPE, code])
    }
}

/// Map text to septets, or `None` if some character is outside the alphabet.
pub fn encode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        out.extend(char_septets(ch)?);
    }
    Some(out)
}

/// Map septets back to text. Unknown extension codes decode as a space, like most handsets.
pub fn decode(septets: &[u8]) -> String {
    let mut out = String::with_capacity(septets.len());
    let mut iter = septets.iter().copied();
    while let Some(s) = iter.next() {
        if s == ESCAPE {
            match iter.next() {
                Some(code) => {
                    let ch = EXTENSION
                        .iter()
                        .find(|(c, _)| *c == code)
                        .map(|(_, ch)| *ch)
                        .unwrap_or(' ');
                    out.push(ch);
                }
                None => break,
            }
        } else {
            out.push(BASIC[(s & 0x7F) as usize]);
        }
    }
    out
}

/// Pack septets LSB-first, leaving `fill_bits` zero bits in front.
pub fn pack(septets: &[u8], fill_bits: usize) -> Vec<u8> {
    let total_bits = fill_bits + septets.len() * 7;
    let mut out = vec![0u8; total_bits.div_ceil(8)];
    for (i, &s) in septets.iter().enumerate() {
        let bit = fill_bits + i * 7;
        let (byte, shift) = (bit / 8, bit % 8);
        let value = ((s & 0x7F) as u16) << shift;
        out[byte] |= (value & 0xFF) as u8;
        if value > 0xFF {
            out[byte + 1] |= (value >> 8) as u8;
        }
    }
    out
}

/// Unpack `count` septets starting at bit 0. Stops early if `data` runs out.
pub fn unpack(data: &[u8], count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bit = i * 7;
        let (byte, shift) = (bit / 8, bit % 8);
        let Some(&lo) = data.get(byte) else { break };
        let hi = data.get(byte + 1).copied().unwrap_or(0);
        let word = (lo as u16) | ((hi as u16) << 8);
        out.push(((word >> shift) & 0x7F) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packs_classic_hellohello() {
        let septets = encode("hellohello").unwrap();
        let packed = pack(&septets, 0);
        assert_eq!(
            packed,
            vec![0xE8, 0x32, 0x9B, 0xFD, 0x46, 0x97, 0xD9, 0xEC, 0x37]
        );
        assert_eq!(decode(&unpack(&packed, 10)), "hellohello");
    }

    #[test]
    fn test_extension_chars_take_two_septets() {
        let septets = encode("€5 [x]").unwrap();
        assert_eq!(septets.len(), 9);
        assert_eq!(decode(&septets), "€5 [x]");
    }

    #[test]
    fn test_emoji_is_not_encodable() {
        assert!(encode("hi 🙂").is_none());
        assert!(encode("Grüße aus Köln").is_some());
    }

    #[test]
    fn test_fill_bits_shift_first_septet() {
        // one fill bit: 'A' (0x41) lands at bit 1
        assert_eq!(pack(&[0x41], 1), vec![0x82]);
    }
}
