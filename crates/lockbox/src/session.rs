//! pairing session: the per-helper encrypted channel
//!
//! each side holds its own ed25519 key pair. once the peer's public key
//! is known both sides derive the same x25519 shared secret, which keys
//! chacha20poly1305 together with an iv fixed for the whole session.
//!
//! the iv is reused for every message of a session. the session only
//! carries low volume control traffic and shares, and the wire format
//! is kept as is for compatibility with paired devices.

use zeroize::Zeroizing;

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::crypto::{self, SESSION_IV_LEN, SESSION_KEY_LEN};
use crate::keys::KeyPair;
use crate::{Error, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct PairingSession {
    keys: KeyPair,
    iv: [u8; SESSION_IV_LEN],
    peer_public_key: Vec<u8>,
    session_key: Option<Zeroizing<[u8; SESSION_KEY_LEN]>>,
}

impl std::fmt::Debug for PairingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingSession")
            .field("public_key", &self.keys.public_key_hex())
            .field("iv", &hex::encode(self.iv))
            .field("peer_public_key", &hex::encode(&self.peer_public_key))
            .field("has_session_key", &self.session_key.is_some())
            .finish()
    }
}

impl Default for PairingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingSession {
    /// fresh ed25519 keys and a random iv, no peer yet
    pub fn new() -> Self {
        Self {
            keys: KeyPair::generate_ed25519(),
            iv: crypto::random_bytes(),
            peer_public_key: Vec::new(),
            session_key: None,
        }
    }

    /// rebuild a session from persisted parts, re-deriving the key
    pub fn restore(keys: KeyPair, iv: [u8; SESSION_IV_LEN], peer_public_key: &[u8]) -> Result<Self> {
        let mut session = Self {
            keys,
            iv,
            peer_public_key: Vec::new(),
            session_key: None,
        };
        if !peer_public_key.is_empty() {
            session.set_peer_public_key(peer_public_key)?;
        }
        Ok(session)
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    pub fn public_key(&self) -> &[u8] {
        self.keys.public_key()
    }

    pub fn peer_public_key(&self) -> &[u8] {
        &self.peer_public_key
    }

    pub fn iv(&self) -> &[u8; SESSION_IV_LEN] {
        &self.iv
    }

    /// adopt the iv chosen by the side that answered the pairing request
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        self.iv = iv
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("session iv is {} bytes", iv.len())))?;
        Ok(())
    }

    /// record the peer key and derive the session key
    pub fn set_peer_public_key(&mut self, peer_public_key: &[u8]) -> Result<()> {
        let key = self.keys.derive_session_key(peer_public_key)?;
        self.peer_public_key = peer_public_key.to_vec();
        self.session_key = Some(Zeroizing::new(key));
        Ok(())
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.session_key.as_ref().ok_or(Error::SessionKeyMissing)?;
        crypto::session_seal(key, &self.iv, plaintext)
    }

    /// empty result means the ciphertext did not authenticate
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = self.session_key.as_ref().ok_or(Error::SessionKeyMissing)?;
        Ok(crypto::session_open(key, &self.iv, ciphertext).unwrap_or_default())
    }
}

impl Encode for PairingSession {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put(&self.keys)?;
        w.put_bytes(&self.iv)?;
        w.put_bytes(&self.peer_public_key)?;
        match &self.session_key {
            Some(key) => w.put_bytes(key.as_slice()),
            None => w.put_bytes(&[]),
        }
    }
}

impl Decode for PairingSession {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let keys: KeyPair = r.get()?;
        let iv = r.bytes()?;
        let iv: [u8; SESSION_IV_LEN] = iv
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("session iv is {} bytes", iv.len())))?;
        let peer_public_key = r.bytes()?.to_vec();
        let session_key = match r.bytes()? {
            [] => None,
            key => {
                let key: [u8; SESSION_KEY_LEN] = key
                    .try_into()
                    .map_err(|_| Error::InvalidKey(format!("session key is {} bytes", key.len())))?;
                Some(Zeroizing::new(key))
            }
        };
        Ok(Self {
            keys,
            iv,
            peer_public_key,
            session_key,
        })
    }
}
