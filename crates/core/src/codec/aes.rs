//! AES-CBC helpers for the standard security handler.

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use cbc::{Decryptor, Encryptor};

type Aes128CbcDec = Decryptor<aes::Aes128>;
type Aes256CbcDec = Decryptor<aes::Aes256>;
type Aes128CbcEnc = Encryptor<aes::Aes128>;

/// Decrypt `data` with AES-CBC under a 16- or 32-byte key.
///
/// Returns `None` when the key or IV has the wrong size, or when `data` is
/// not a whole number of blocks.
pub fn aes_cbc_decrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() % 16 != 0 {
        return None;
    }
    let mut buf = data.to_vec();
    match key.len() {
        16 => {
            Aes128CbcDec::new_from_slices(key, iv)
                .ok()?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .ok()?;
        }
        32 => {
            Aes256CbcDec::new_from_slices(key, iv)
                .ok()?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .ok()?;
        }
        _ => return None,
    }
    Some(buf)
}

/// Encrypt `data` with AES-128-CBC, no padding.
pub fn aes_cbc_encrypt(key: &[u8], iv: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() % 16 != 0 {
        return None;
    }
    let mut buf = data.to_vec();
    Aes128CbcEnc::new_from_slices(key, iv)
        .ok()?
        .encrypt_padded_mut::<NoPadding>(&mut buf, data.len())
        .ok()?;
    Some(buf)
}

/// Strip PKCS#7 padding. Invalid padding leaves the data unchanged.
pub fn unpad_aes(data: &[u8]) -> &[u8] {
    let Some(&last) = data.last() else {
        return data;
    };
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > 16 || pad_len > data.len() {
        return data;
    }
    let start = data.len() - pad_len;
    if data[start..].iter().all(|&b| b == last) {
        &data[..start]
    } else {
        data
    }
}
