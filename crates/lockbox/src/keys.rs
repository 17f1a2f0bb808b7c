//! typed key pairs
//!
//! two algorithms with different capabilities:
//! - ed25519: sign, derive a session key (via x25519), serialize
//! - ecdsa (secp256k1): sign, serialize
//!
//! keys are held as raw bytes so that any key pair round-trips through
//! the codec; algorithm objects are rebuilt on use.

use ed25519_dalek::Signer as _;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::crypto::SESSION_KEY_LEN;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyType {
    Ed25519,
    Ecdsa,
}

impl KeyType {
    pub fn tag(self) -> u8 {
        match self {
            KeyType::Ed25519 => 0,
            KeyType::Ecdsa => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(KeyType::Ed25519),
            1 => Ok(KeyType::Ecdsa),
            _ => Err(Error::UnknownTag { kind: "key type", tag }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Ecdsa => "ecdsa",
        }
    }

    /// whether keys of this type can agree on a pairing session key
    pub fn supports_session_keys(self) -> bool {
        matches!(self, KeyType::Ed25519)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    key_type: KeyType,
    public_key: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_type", &self.key_type)
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    pub fn generate(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Ed25519 => Self::generate_ed25519(),
            KeyType::Ecdsa => Self::generate_ecdsa(),
        }
    }

    pub fn generate_ed25519() -> Self {
        let sk = ed25519_dalek::SigningKey::generate(&mut OsRng);
        Self {
            key_type: KeyType::Ed25519,
            public_key: sk.verifying_key().to_bytes().to_vec(),
            private_key: Zeroizing::new(sk.to_bytes().to_vec()),
        }
    }

    pub fn generate_ecdsa() -> Self {
        let sk = k256::ecdsa::SigningKey::random(&mut OsRng);
        let public_key = sk.verifying_key().to_encoded_point(true).as_bytes().to_vec();
        Self {
            key_type: KeyType::Ecdsa,
            public_key,
            private_key: Zeroizing::new(sk.to_bytes().to_vec()),
        }
    }

    /// build from raw parts; both keys must be non-empty
    pub fn from_parts(key_type: KeyType, public_key: Vec<u8>, private_key: Vec<u8>) -> Result<Self> {
        if public_key.is_empty() || private_key.is_empty() {
            return Err(Error::InvalidKey(format!(
                "{} key pair needs both public and private key",
                key_type.name()
            )));
        }
        Ok(Self {
            key_type,
            public_key,
            private_key: Zeroizing::new(private_key),
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self.key_type {
            KeyType::Ed25519 => Ok(self.ed25519_signing_key()?.sign(message).to_bytes().to_vec()),
            KeyType::Ecdsa => {
                let sk = k256::ecdsa::SigningKey::from_slice(&self.private_key)
                    .map_err(|e| Error::InvalidKey(e.to_string()))?;
                let sig: k256::ecdsa::Signature = k256::ecdsa::signature::Signer::sign(&sk, message);
                Ok(sig.to_bytes().to_vec())
            }
        }
    }

    /// x25519 agreement between this ed25519 key and a peer ed25519 public key
    pub fn derive_session_key(&self, peer_public_key: &[u8]) -> Result<[u8; SESSION_KEY_LEN]> {
        if !self.key_type.supports_session_keys() {
            return Err(Error::UnsupportedKeyOperation(self.key_type.name()));
        }
        let secret = x25519_dalek::StaticSecret::from(self.ed25519_signing_key()?.to_scalar_bytes());

        let peer: [u8; 32] = peer_public_key
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("peer key is {} bytes", peer_public_key.len())))?;
        let peer = ed25519_dalek::VerifyingKey::from_bytes(&peer)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        let peer = x25519_dalek::PublicKey::from(peer.to_montgomery().to_bytes());

        let shared = secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(Error::InvalidKey("low order peer key".into()));
        }
        Ok(shared.to_bytes())
    }

    fn ed25519_signing_key(&self) -> Result<ed25519_dalek::SigningKey> {
        let seed: [u8; 32] = self
            .private_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey(format!("ed25519 seed is {} bytes", self.private_key.len())))?;
        Ok(ed25519_dalek::SigningKey::from_bytes(&seed))
    }
}

impl Encode for KeyPair {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put_u8(self.key_type.tag());
        w.put_bytes(&self.public_key)?;
        w.put_bytes(&self.private_key)
    }
}

impl Decode for KeyPair {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let key_type = KeyType::from_tag(r.u8()?)?;
        let public_key = r.bytes()?.to_vec();
        let private_key = r.bytes()?.to_vec();
        Self::from_parts(key_type, public_key, private_key)
    }
}
