//! USM privacy: DES-CBC (RFC 3414) and AES-CFB128 (RFC 3826).

use aes::Aes128;
use cipher::block_padding::{NoPadding, Pkcs7};
use cipher::{AsyncStreamCipher, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::Des;
use rand::Rng;

use super::message::SecurityParams;
use crate::{Error, Result};

type DesCbcEnc = cbc::Encryptor<Des>;
type DesCbcDec = cbc::Decryptor<Des>;
type AesCfbEnc = cfb_mode::Encryptor<Aes128>;
type AesCfbDec = cfb_mode::Decryptor<Aes128>;

const SALT_LEN: usize = 8;

/// Privacy protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivProtocol {
    Cbc56Des,
    Cfb128Aes,
}

impl PrivProtocol {
    /// Parse a configuration name. The `USM_PRIV_` prefix used by common
    /// tooling is accepted and optional.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("USM_PRIV_").unwrap_or(name);
        Some(match name {
            "CBC56_DES" => Self::Cbc56Des,
            "CFB128_AES" => Self::Cfb128Aes,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cbc56Des => "CBC56_DES",
            Self::Cfb128Aes => "CFB128_AES",
        }
    }

    /// Encrypt an encoded scoped PDU. A fresh 8-byte salt is generated and
    /// stored into `params.priv_params` for the receiver.
    pub fn encrypt(
        &self,
        key: &[u8],
        plain: &[u8],
        params: &mut SecurityParams,
    ) -> Result<Vec<u8>> {
        let salt: [u8; SALT_LEN] = rand::thread_rng().gen();
        params.priv_params = salt.to_vec();
        match self {
            Self::Cbc56Des => {
                let iv = des_iv(key, &salt)?;
                let enc = DesCbcEnc::new_from_slices(&key[..8], &iv)
                    .map_err(|_| Error::protocol("privacy key too short"))?;
                Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plain))
            }
            Self::Cfb128Aes => {
                let iv = aes_iv(params.engine_boots, params.engine_time, &salt);
                let mut buf = pad_block(plain, 16);
                AesCfbEnc::new_from_slices(&key[..key.len().min(16)], &iv)
                    .map_err(|_| Error::protocol("privacy key too short"))?
                    .encrypt(&mut buf);
                Ok(buf)
            }
        }
    }

    /// Decrypt a ciphertext using the salt and engine counters carried in
    /// the received security parameters. DES padding is left in place; the
    /// decoder tolerates trailing bytes past the scoped PDU.
    pub fn decrypt(
        &self,
        key: &[u8],
        cipher: &[u8],
        params: &SecurityParams,
    ) -> Result<Vec<u8>> {
        if params.priv_params.len() != SALT_LEN {
            return Err(Error::Decryption);
        }
        match self {
            Self::Cbc56Des => {
                if cipher.is_empty() || cipher.len() % 8 != 0 {
                    return Err(Error::Decryption);
                }
                let iv = des_iv(key, &params.priv_params)?;
                let dec = DesCbcDec::new_from_slices(&key[..8], &iv)
                    .map_err(|_| Error::Decryption)?;
                dec.decrypt_padded_vec_mut::<NoPadding>(cipher)
                    .map_err(|_| Error::Decryption)
            }
            Self::Cfb128Aes => {
                let iv = aes_iv(
                    params.engine_boots,
                    params.engine_time,
                    &params.priv_params,
                );
                let mut buf = cipher.to_vec();
                AesCfbDec::new_from_slices(&key[..key.len().min(16)], &iv)
                    .map_err(|_| Error::Decryption)?
                    .decrypt(&mut buf);
                Ok(buf)
            }
        }
    }
}

/// DES IV: the salt XORed with the second half of the 16-byte localized key.
fn des_iv(key: &[u8], salt: &[u8]) -> Result<[u8; 8]> {
    if key.len() < 16 {
        return Err(Error::Decryption);
    }
    let mut iv = [0u8; 8];
    for (i, b) in iv.iter_mut().enumerate() {
        *b = salt[i] ^ key[8 + i];
    }
    Ok(iv)
}

/// AES IV: engine boots and engine time big-endian, then the salt.
fn aes_iv(engine_boots: i64, engine_time: i64, salt: &[u8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&(engine_boots as u32).to_be_bytes());
    iv[4..8].copy_from_slice(&(engine_time as u32).to_be_bytes());
    iv[8..].copy_from_slice(salt);
    iv
}

/// PKCS#7-style padding to a block boundary; always appends.
fn pad_block(data: &[u8], block: usize) -> Vec<u8> {
    let pad = block - data.len() % block;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad as u8).take(pad));
    out
}
