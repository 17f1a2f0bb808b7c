//! user identity and operating modes

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::{Error, Result};

/// placeholder phone for the helper record of an in-flight pairing
pub const PAIRING_PLACEHOLDER_PHONE: &str = "00000000000000000000";
const PAIRING_PLACEHOLDER_NAME: &str = "UnknownForPairing";

/// reserved phone that is never sealed, restored or kept alive
pub const RECOVERY_PLACEHOLDER_PHONE: &str = "11111111111111111111";

/// strip the formatting characters people type into phone numbers
pub fn normalize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !matches!(c, '+' | '-' | ' ' | '(' | ')'))
        .collect()
}

/// pretty-print a normalized phone number for display
///
/// ten digits render as `(xxx) xxx-xxxx`, seven as `xxx-xxxx`; anything
/// else is returned unchanged.
pub fn format_phone(phone: &str) -> String {
    let digits = normalize_phone(phone);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return phone.to_string();
    }
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
        7 => format!("{}-{}", &digits[..3], &digits[3..]),
        _ => phone.to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct User {
    pub name: String,
    pub phone: String,
}

impl User {
    /// phone is normalized on construction
    pub fn new(name: impl Into<String>, phone: &str) -> Self {
        Self {
            name: name.into(),
            phone: normalize_phone(phone),
        }
    }

    pub fn pairing_placeholder() -> Self {
        Self {
            name: PAIRING_PLACEHOLDER_NAME.into(),
            phone: PAIRING_PLACEHOLDER_PHONE.into(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        is_placeholder_phone(&self.phone)
    }
}

pub fn is_placeholder_phone(phone: &str) -> bool {
    phone == PAIRING_PLACEHOLDER_PHONE || phone == RECOVERY_PLACEHOLDER_PHONE
}

impl Encode for User {
    fn encode(&self, w: &mut Writer) -> Result<()> {
        w.put_str(&self.name)?;
        w.put_str(&self.phone)
    }
}

impl Decode for User {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            name: r.string()?,
            phone: r.string()?,
        })
    }
}

/// whether a party is operating normally or rebuilding a lost device
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OperatingMode {
    #[default]
    Normal,
    Recovery,
}

impl OperatingMode {
    pub fn tag(self) -> u8 {
        match self {
            OperatingMode::Normal => 0,
            OperatingMode::Recovery => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(OperatingMode::Normal),
            1 => Ok(OperatingMode::Recovery),
            _ => Err(Error::UnknownTag { kind: "operating mode", tag }),
        }
    }
}

/// paused parties neither send nor answer keepalives
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PauseMode {
    #[default]
    Active,
    Paused,
}

impl PauseMode {
    pub fn toggled(self) -> Self {
        match self {
            PauseMode::Active => PauseMode::Paused,
            PauseMode::Paused => PauseMode::Active,
        }
    }
}
