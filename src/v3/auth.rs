//! USM authentication: passphrase-to-key derivation, key localization and
//! the HMAC families of RFC 3414 and RFC 7860.

use hmac::{Mac, SimpleHmac};
use md5::digest::crypto_common::BlockSizeUser;
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};

use crate::{Error, Result};

/// Authentication protocol families with their digest truncation lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    Hmac96Md5,
    Hmac96Sha,
    Hmac128Sha224,
    Hmac192Sha256,
    Hmac256Sha384,
    Hmac384Sha512,
}

impl AuthProtocol {
    /// Parse a configuration name. The `USM_AUTH_` prefix used by common
    /// tooling is accepted and optional.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("USM_AUTH_").unwrap_or(name);
        Some(match name {
            "HMAC96_MD5" => Self::Hmac96Md5,
            "HMAC96_SHA" => Self::Hmac96Sha,
            "HMAC128_SHA224" => Self::Hmac128Sha224,
            "HMAC192_SHA256" => Self::Hmac192Sha256,
            "HMAC256_SHA384" => Self::Hmac256Sha384,
            "HMAC384_SHA512" => Self::Hmac384Sha512,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hmac96Md5 => "HMAC96_MD5",
            Self::Hmac96Sha => "HMAC96_SHA",
            Self::Hmac128Sha224 => "HMAC128_SHA224",
            Self::Hmac192Sha256 => "HMAC192_SHA256",
            Self::Hmac256Sha384 => "HMAC256_SHA384",
            Self::Hmac384Sha512 => "HMAC384_SHA512",
        }
    }

    /// Number of digest octets carried in the authentication parameters.
    pub const fn truncated_len(&self) -> usize {
        match self {
            Self::Hmac96Md5 | Self::Hmac96Sha => 12,
            Self::Hmac128Sha224 => 16,
            Self::Hmac192Sha256 => 24,
            Self::Hmac256Sha384 => 32,
            Self::Hmac384Sha512 => 48,
        }
    }

    /// RFC 3414 A.2: stretch a passphrase into a master key by streaming
    /// 1'048'576 bytes of the repeated passphrase through the hash.
    pub fn derive_key(&self, passphrase: &[u8]) -> Result<Vec<u8>> {
        if passphrase.is_empty() {
            return Err(Error::invalid_config("passphrase must not be empty"));
        }
        Ok(match self {
            Self::Hmac96Md5 => derive::<Md5>(passphrase),
            Self::Hmac96Sha => derive::<Sha1>(passphrase),
            Self::Hmac128Sha224 => derive::<Sha224>(passphrase),
            Self::Hmac192Sha256 => derive::<Sha256>(passphrase),
            Self::Hmac256Sha384 => derive::<Sha384>(passphrase),
            Self::Hmac384Sha512 => derive::<Sha512>(passphrase),
        })
    }

    /// RFC 3414 2.6: localize a master key to an engine id,
    /// `H(key || engine_id || key)`.
    pub fn localize(&self, key: &[u8], engine_id: &[u8]) -> Vec<u8> {
        match self {
            Self::Hmac96Md5 => localize::<Md5>(key, engine_id),
            Self::Hmac96Sha => localize::<Sha1>(key, engine_id),
            Self::Hmac128Sha224 => localize::<Sha224>(key, engine_id),
            Self::Hmac192Sha256 => localize::<Sha256>(key, engine_id),
            Self::Hmac256Sha384 => localize::<Sha384>(key, engine_id),
            Self::Hmac384Sha512 => localize::<Sha512>(key, engine_id),
        }
    }

    /// HMAC over `msg`, truncated to this family's parameter length.
    pub fn sign(&self, key: &[u8], msg: &[u8]) -> Result<Vec<u8>> {
        let mut digest = match self {
            Self::Hmac96Md5 => hmac_digest::<Md5>(key, msg)?,
            Self::Hmac96Sha => hmac_digest::<Sha1>(key, msg)?,
            Self::Hmac128Sha224 => hmac_digest::<Sha224>(key, msg)?,
            Self::Hmac192Sha256 => hmac_digest::<Sha256>(key, msg)?,
            Self::Hmac256Sha384 => hmac_digest::<Sha384>(key, msg)?,
            Self::Hmac384Sha512 => hmac_digest::<Sha512>(key, msg)?,
        };
        digest.truncate(self.truncated_len());
        Ok(digest)
    }
}

fn derive<D: Digest>(passphrase: &[u8]) -> Vec<u8> {
    let repeats = 64 / passphrase.len() + 1;
    let buff = passphrase.repeat(repeats);
    let ln = buff.len();
    let mut hasher = D::new();
    let mut mk = 0usize;
    for _ in 0..16384 {
        let i = mk + 64;
        if i < ln {
            hasher.update(&buff[mk..i]);
            mk = i;
        } else {
            hasher.update(&buff[mk..ln]);
            hasher.update(&buff[0..i - ln]);
            mk = i - ln;
        }
    }
    hasher.finalize().to_vec()
}

fn localize<D: Digest>(key: &[u8], engine_id: &[u8]) -> Vec<u8> {
    D::new()
        .chain_update(key)
        .chain_update(engine_id)
        .chain_update(key)
        .finalize()
        .to_vec()
}

fn hmac_digest<D>(key: &[u8], msg: &[u8]) -> Result<Vec<u8>>
where
    D: Digest + BlockSizeUser,
{
    let mut mac = SimpleHmac::<D>::new_from_slice(key)
        .map_err(|_| Error::protocol("invalid HMAC key length"))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().to_vec())
}
