//! threshold secret sharing using shamir's scheme over GF(256)
//!
//! arbitrary secret length, n shares, threshold t. a share is its
//! evaluation point followed by one byte per secret byte.
//!
//! combining fewer than t shares does not fail; it yields an unrelated
//! value. callers detect that by authenticating what the secret opens.

use crate::{Error, Result};
use rand::RngCore;

/// most shares a single split can produce (evaluation points 1..=255)
pub const MAX_SHARES: usize = 255;

/// threshold used for a lockbox distributed to `helpers` parties
pub fn majority_threshold(helpers: usize) -> usize {
    helpers.div_ceil(2)
}

/// a single share
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Share {
    /// evaluation point (non-zero)
    pub index: u8,
    /// share data (same length as secret)
    pub data: Vec<u8>,
}

impl Share {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data.len());
        out.push(self.index);
        out.extend_from_slice(&self.data);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.split_first() {
            Some((&index, data)) if index != 0 => Ok(Self {
                index,
                data: data.to_vec(),
            }),
            _ => Err(Error::InvalidShareFormat),
        }
    }
}

/// GF(256) multiplication using AES polynomial (x^8 + x^4 + x^3 + x + 1)
fn gf256_mul(a: u8, b: u8) -> u8 {
    let mut result = 0u8;
    let mut a = a;
    let mut b = b;

    while b != 0 {
        if b & 1 != 0 {
            result ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    result
}

/// a^254 = a^(-1) in GF(256)
fn gf256_inv(a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    let mut result = a;
    for _ in 0..6 {
        result = gf256_mul(result, result);
        result = gf256_mul(result, a);
    }
    gf256_mul(result, result)
}

fn gf256_div(a: u8, b: u8) -> u8 {
    gf256_mul(a, gf256_inv(b))
}

/// horner evaluation, coefficients lowest degree first
fn poly_eval(coeffs: &[u8], x: u8) -> u8 {
    coeffs.iter().rev().fold(0u8, |acc, &c| gf256_mul(acc, x) ^ c)
}

/// lagrange basis weights at x=0 for the given evaluation points
fn lagrange_weights(xs: &[u8]) -> Vec<u8> {
    xs.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let mut num = 1u8;
            let mut den = 1u8;
            for (j, &xj) in xs.iter().enumerate() {
                if i != j {
                    num = gf256_mul(num, xj); // (0 - xj) = xj in GF(256)
                    den = gf256_mul(den, xi ^ xj); // (xi - xj)
                }
            }
            gf256_div(num, den)
        })
        .collect()
}

/// split a secret into `shares` shares, any `threshold` of which recover it
pub fn split_secret(secret: &[u8], shares: usize, threshold: usize) -> Result<Vec<Share>> {
    if threshold == 0 || threshold > shares || shares > MAX_SHARES {
        return Err(Error::InvalidSharingParams { shares, threshold });
    }

    let mut rng = rand::thread_rng();
    let mut out: Vec<Share> = (1..=shares as u8)
        .map(|index| Share {
            index,
            data: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coeffs = vec![0u8; threshold];
    for &byte in secret {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);
        for share in out.iter_mut() {
            share.data.push(poly_eval(&coeffs, share.index));
        }
    }

    Ok(out)
}

/// interpolate the secret from every given share
pub fn combine_shares(shares: &[Share]) -> Result<Vec<u8>> {
    let Some(first) = shares.first() else {
        return Err(Error::NotEnoughShares { have: 0, need: 1 });
    };
    let len = first.data.len();

    let mut xs = Vec::with_capacity(shares.len());
    for share in shares {
        if share.index == 0 || share.data.len() != len || xs.contains(&share.index) {
            return Err(Error::InvalidShareFormat);
        }
        xs.push(share.index);
    }

    let weights = lagrange_weights(&xs);
    let secret = (0..len)
        .map(|i| {
            shares
                .iter()
                .zip(&weights)
                .fold(0u8, |acc, (share, &w)| acc ^ gf256_mul(share.data[i], w))
        })
        .collect();
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gf256_ops() {
        assert_eq!(gf256_mul(0, 0), 0);
        assert_eq!(gf256_mul(1, 1), 1);
        assert_eq!(gf256_mul(2, 2), 4);

        for a in 1..=255u8 {
            let inv = gf256_inv(a);
            assert_eq!(gf256_mul(a, inv), 1, "inverse failed for {}", a);
        }
    }

    #[test]
    fn test_majority_threshold() {
        assert_eq!(majority_threshold(3), 2);
        assert_eq!(majority_threshold(4), 2);
        assert_eq!(majority_threshold(5), 3);
    }

    #[test]
    fn test_any_threshold_subset_recovers() {
        let secret = b"lockbox key material, any length".to_vec();
        let shares = split_secret(&secret, 5, 3).unwrap();

        for a in 0..5 {
            for b in (a + 1)..5 {
                for c in (b + 1)..5 {
                    let subset = [shares[a].clone(), shares[b].clone(), shares[c].clone()];
                    assert_eq!(combine_shares(&subset).unwrap(), secret);
                }
            }
        }
        assert_eq!(combine_shares(&shares).unwrap(), secret);
    }

    #[test]
    fn test_lockbox_sized_secret_four_of_eight() {
        // serialized key and nonce with their length prefixes
        let secret: Vec<u8> = (0..56u8).collect();
        let shares = split_secret(&secret, 8, 4).unwrap();

        for start in 0..5 {
            assert_eq!(combine_shares(&shares[start..start + 4]).unwrap(), secret);
        }
        let spread = [shares[0].clone(), shares[2].clone(), shares[5].clone(), shares[7].clone()];
        assert_eq!(combine_shares(&spread).unwrap(), secret);
        assert_ne!(combine_shares(&shares[..3]).unwrap(), secret);
    }

    #[test]
    fn test_below_threshold_yields_garbage() {
        let secret = [42u8; 32];
        let shares = split_secret(&secret, 4, 3).unwrap();
        let recovered = combine_shares(&shares[..2]).unwrap();
        assert_ne!(recovered, secret.to_vec());
    }

    #[test]
    fn test_share_bytes() {
        let shares = split_secret(&[1, 2, 3], 3, 2).unwrap();
        let bytes = shares[1].to_bytes();
        assert_eq!(bytes.len(), 4);
        assert_eq!(bytes[0], 2);
        assert_eq!(Share::from_bytes(&bytes).unwrap(), shares[1]);
        assert!(Share::from_bytes(&[]).is_err());
        assert!(Share::from_bytes(&[0, 1]).is_err());
    }

    #[test]
    fn test_invalid_params() {
        assert!(split_secret(&[1], 3, 0).is_err());
        assert!(split_secret(&[1], 3, 4).is_err());
        assert!(split_secret(&[1], 256, 2).is_err());
        assert!(combine_shares(&[]).is_err());
    }

    #[test]
    fn test_duplicate_share_rejected() {
        let shares = split_secret(&[9; 8], 3, 2).unwrap();
        assert!(combine_shares(&[shares[0].clone(), shares[0].clone()]).is_err());
    }

    proptest! {
        #[test]
        fn prop_split_combine(secret in proptest::collection::vec(any::<u8>(), 0..80), n in 1usize..8) {
            let t = majority_threshold(n);
            let shares = split_secret(&secret, n, t).unwrap();
            prop_assert_eq!(combine_shares(&shares[n - t..]).unwrap(), secret);
        }
    }
}
