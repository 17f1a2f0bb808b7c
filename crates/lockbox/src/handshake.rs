//! pairing handshake over qr codes
//!
//! the requester shows a short sequence of qr codes, each carrying one
//! handshake packet with a distinct counter and its own random nonce.
//! the scanner needs a run of consecutive counters before it accepts the
//! request, which filters out stray frames of an older request.
//!
//! packet layout:
//!
//! ```text
//! counter u8 | u16 nonces | mode u8 | u16 name | u16 phone | u16 pubkey | zero padding
//! ```
//!
//! on screen every byte after the counter is xored with a keystream
//! seeded by the counter, then the whole packet is base45 encoded.

use std::collections::BTreeMap;

use rand::seq::index;

use crate::base45;
use crate::codec::{Reader, Writer};
use crate::user::{normalize_phone, OperatingMode, User};
use crate::{Error, Result};

/// plaintext of the pairing acknowledgement
pub const PAIRING_ACK: [u8; 4] = [0; 4];

pub fn is_valid_ack(plaintext: &[u8]) -> bool {
    plaintext == PAIRING_ACK
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakePacket {
    pub counter: u8,
    pub nonces: Vec<u8>,
    pub operating_mode: OperatingMode,
    pub name: String,
    pub phone: String,
    pub public_key: Vec<u8>,
}

impl HandshakePacket {
    pub fn new(
        counter: u8,
        nonces: Vec<u8>,
        operating_mode: OperatingMode,
        user: &User,
        public_key: &[u8],
    ) -> Self {
        Self {
            counter,
            nonces,
            operating_mode,
            name: user.name.clone(),
            phone: normalize_phone(&user.phone),
            public_key: public_key.to_vec(),
        }
    }

    pub fn user(&self) -> User {
        User::new(self.name.clone(), &self.phone)
    }

    /// encode, zero padding up to `min_len`
    pub fn encode(&self, min_len: usize) -> Result<Vec<u8>> {
        let mut w = Writer::new();
        w.put_u8(self.counter);
        w.put_bytes(&self.nonces)?;
        w.put_u8(self.operating_mode.tag());
        w.put_str(&self.name)?;
        w.put_str(&normalize_phone(&self.phone))?;
        w.put_bytes(&self.public_key)?;
        let mut bytes = w.into_bytes();
        if bytes.len() < min_len {
            bytes.resize(min_len, 0);
        }
        Ok(bytes)
    }

    /// parse a packet; trailing padding is ignored
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);
        Ok(Self {
            counter: r.u8()?,
            nonces: r.bytes()?.to_vec(),
            operating_mode: OperatingMode::from_tag(r.u8()?)?,
            name: r.string()?,
            phone: r.string()?,
            public_key: r.bytes()?.to_vec(),
        })
    }
}

/// xor every byte after the counter with the counter-seeded keystream;
/// applying it twice is the identity
pub fn obfuscate(packet: &[u8]) -> Vec<u8> {
    let Some((&counter, body)) = packet.split_first() else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(packet.len());
    out.push(counter);
    let mut s = counter;
    for &b in body {
        out.push(b ^ s);
        s = s.wrapping_mul(7).wrapping_add(1);
    }
    out
}

/// packet bytes to qr text
pub fn encode_qr_chunk(packet: &[u8]) -> String {
    base45::encode(&obfuscate(packet))
}

/// qr text to packet bytes
pub fn decode_qr_chunk(text: &str) -> Result<Vec<u8>> {
    Ok(obfuscate(&base45::decode(text)?))
}

/// the set of packets a requester displays for one pairing attempt
#[derive(Clone, Debug)]
pub struct PairingRequest {
    counters: Vec<u8>,
    packets: Vec<Vec<u8>>,
}

impl PairingRequest {
    /// `count` packets with counters starting at a random byte, each with
    /// its own random nonce (nonces are distinct across the request)
    pub fn generate(
        user: &User,
        mode: OperatingMode,
        public_key: &[u8],
        count: usize,
        min_len: usize,
    ) -> Result<Self> {
        if count == 0 || count > 256 {
            return Err(Error::Config(format!("pairing request needs 1..=256 packets, got {count}")));
        }
        let mut rng = rand::thread_rng();
        let start: u8 = rand::Rng::gen(&mut rng);
        let nonces = index::sample(&mut rng, 256, count);

        let mut counters = Vec::with_capacity(count);
        let mut packets = Vec::with_capacity(count);
        for (i, nonce) in nonces.into_iter().enumerate() {
            let counter = start.wrapping_add(i as u8);
            let packet = HandshakePacket::new(counter, vec![nonce as u8], mode, user, public_key);
            counters.push(counter);
            packets.push(packet.encode(min_len)?);
        }
        Ok(Self { counters, packets })
    }

    pub fn counters(&self) -> &[u8] {
        &self.counters
    }

    pub fn contains_counter(&self, counter: u8) -> bool {
        self.counters.contains(&counter)
    }

    pub fn packets(&self) -> &[Vec<u8>] {
        &self.packets
    }

    pub fn qr_codes(&self) -> Vec<String> {
        self.packets.iter().map(|p| encode_qr_chunk(p)).collect()
    }
}

/// a request accepted after enough consecutive packets were scanned
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedRequest {
    /// first packet of the consecutive run
    pub packet: HandshakePacket,
    pub counters: Vec<u8>,
}

/// collects scanned packets until a consecutive run is complete
#[derive(Debug)]
pub struct RequestAccumulator {
    required: usize,
    packets: BTreeMap<u8, HandshakePacket>,
}

impl RequestAccumulator {
    pub fn new(required: usize) -> Self {
        Self {
            required: required.clamp(1, 256),
            packets: BTreeMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.packets.clear();
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// add a scanned packet; duplicates are absorbed and a packet from a
    /// different requester restarts the collection
    pub fn push(&mut self, packet: HandshakePacket) -> Option<AcceptedRequest> {
        let same_requester = self
            .packets
            .values()
            .next()
            .map_or(true, |p| p.public_key == packet.public_key && p.phone == packet.phone);
        if !same_requester {
            self.packets.clear();
        }
        self.packets.insert(packet.counter, packet);

        let start = self.packets.keys().copied().find(|&start| {
            (0..self.required).all(|i| self.packets.contains_key(&start.wrapping_add(i as u8)))
        })?;
        let counters: Vec<u8> = (0..self.required).map(|i| start.wrapping_add(i as u8)).collect();
        let packet = self.packets.remove(&start)?;
        self.packets.clear();
        Some(AcceptedRequest { packet, counters })
    }
}

/// response payload: `u16 iv | iv | u16 pubkey | pubkey | ciphertext`
pub fn encode_response(iv: &[u8], public_key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let mut w = Writer::new();
    w.put_bytes(iv)?;
    w.put_bytes(public_key)?;
    w.put_raw(ciphertext);
    Ok(w.into_bytes())
}

#[derive(Debug, PartialEq, Eq)]
pub struct ResponseFrame<'a> {
    pub iv: &'a [u8],
    pub public_key: &'a [u8],
    pub ciphertext: &'a [u8],
}

pub fn parse_response(bytes: &[u8]) -> Result<ResponseFrame<'_>> {
    let mut r = Reader::new(bytes);
    Ok(ResponseFrame {
        iv: r.bytes()?,
        public_key: r.bytes()?,
        ciphertext: r.rest(),
    })
}
