//! accounts and the vault that holds them

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::crypto::random_bytes;
use crate::keys::KeyPair;
use crate::{Error, Result};

/// a protected account: a key pair plus where it is used
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    /// local identifier, unique within a vault
    pub id: String,
    pub name: String,
    /// identifier on the external network (address, username, ...)
    pub account_id: String,
    pub key: KeyPair,
    pub network: String,
}

impl Account {
    /// id is derived from the creation time plus a random suffix so two
    /// accounts created within the same millisecond stay distinct
    pub fn new(
        name: impl Into<String>,
        account_id: impl Into<String>,
        network: impl Into<String>,
        key: KeyPair,
        now_millis: u64,
    ) -> Self {
        Self {
            id: format!("{now_millis:013}-{}", hex::encode(random_bytes::<4>())),
            name: name.into(),
            account_id: account_id.into(),
            key,
            network: network.into(),
        }
    }
}

impl Encode for Account {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put_str(&self.id)?;
        w.put_str(&self.name)?;
        w.put_str(&self.account_id)?;
        w.put(&self.key)?;
        w.put_str(&self.network)
    }
}

impl Decode for Account {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            id: r.string()?,
            name: r.string()?,
            account_id: r.string()?,
            key: r.get()?,
            network: r.string()?,
        })
    }
}

/// vault payload kind; only account vaults exist today
const VAULT_KIND_ACCOUNTS: u8 = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vault {
    accounts: Vec<Account>,
}

impl Vault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// returns false and leaves the vault untouched if the id is taken
    pub fn add(&mut self, account: Account) -> bool {
        if self.get(&account.id).is_some() {
            return false;
        }
        self.accounts.push(account);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<Account> {
        let idx = self.accounts.iter().position(|a| a.id == id)?;
        Some(self.accounts.remove(idx))
    }
}

impl Encode for Vault {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put_u8(VAULT_KIND_ACCOUNTS);
        w.put_len(self.accounts.len())?;
        for account in &self.accounts {
            w.put(account)?;
        }
        Ok(())
    }
}

impl Decode for Vault {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let kind = r.u8()?;
        if kind != VAULT_KIND_ACCOUNTS {
            return Err(Error::UnknownTag { kind: "vault", tag: kind });
        }
        let count = r.len()?;
        let mut accounts = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            accounts.push(r.get()?);
        }
        Ok(Self { accounts })
    }
}
