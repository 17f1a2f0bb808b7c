//! base45 text encoding for qr codes
//!
//! every two input bytes become three symbols, a trailing odd byte
//! becomes two. the alphabet fits qr alphanumeric mode.

use crate::{Error, Result};

const ALPHABET: &[u8; 45] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ $%*+-./:";

fn symbol_value(c: u8) -> Result<u32> {
    ALPHABET
        .iter()
        .position(|&a| a == c)
        .map(|p| p as u32)
        .ok_or_else(|| Error::Base45(format!("symbol {:?} outside alphabet", c as char)))
}

pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() / 2 * 3 + 2);
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        let mut v = ((pair[0] as u32) << 8) | pair[1] as u32;
        for _ in 0..3 {
            out.push(ALPHABET[(v % 45) as usize] as char);
            v /= 45;
        }
    }
    if let [last] = chunks.remainder() {
        let v = *last as u32;
        out.push(ALPHABET[(v % 45) as usize] as char);
        out.push(ALPHABET[(v / 45) as usize] as char);
    }
    out
}

pub fn decode(text: &str) -> Result<Vec<u8>> {
    let symbols = text.as_bytes();
    if symbols.len() % 3 == 1 {
        return Err(Error::Base45(format!("dangling symbol at length {}", symbols.len())));
    }

    let mut out = Vec::with_capacity(symbols.len() / 3 * 2 + 1);
    for group in symbols.chunks(3) {
        let mut v = 0u32;
        for (i, &c) in group.iter().enumerate() {
            v += symbol_value(c)? * 45u32.pow(i as u32);
        }
        if group.len() == 3 {
            if v > u16::MAX as u32 {
                return Err(Error::Base45(format!("triple value {v} exceeds 65535")));
            }
            out.extend_from_slice(&(v as u16).to_be_bytes());
        } else {
            if v > u8::MAX as u32 {
                return Err(Error::Base45(format!("pair value {v} exceeds 255")));
            }
            out.push(v as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode(b"AB"), "BB8");
        assert_eq!(encode(b"Hello!!"), "%69 VD92EX0");
        assert_eq!(encode(b"ietf!"), "QED8WEX0");
        assert_eq!(decode("QED8WEX0").unwrap(), b"ietf!");
    }

    #[test]
    fn test_empty() {
        assert_eq!(encode(&[]), "");
        assert!(decode("").unwrap().is_empty());
    }

    #[test]
    fn test_extremes() {
        assert_eq!(decode(&encode(&[0xff, 0xff])).unwrap(), vec![0xff, 0xff]);
        assert_eq!(decode(&encode(&[0xff])).unwrap(), vec![0xff]);
        assert_eq!(decode(&encode(&[0x00])).unwrap(), vec![0x00]);
    }

    #[test]
    fn test_short_and_long_lengths() {
        let all: Vec<u8> = (0..=255u8).collect();
        for len in [0usize, 1, 2, 3, 4, 5, 256] {
            let data = &all[..len];
            assert_eq!(decode(&encode(data)).unwrap(), data);
        }
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(decode("a00").is_err()); // lowercase not in alphabet
        assert!(decode("ABCD").is_err()); // dangling symbol
        assert!(decode("GGW").is_err()); // 16 + 16*45 + 32*2025 > 65535
        assert!(decode(":6").is_err()); // 44 + 6*45 > 255
    }

    proptest! {
        #[test]
        fn prop_encode_decode_inverse(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            let text = encode(&data);
            prop_assert!(text.bytes().all(|c| ALPHABET.contains(&c)));
            prop_assert_eq!(decode(&text).unwrap(), data);
        }
    }
}
