//! Standard security handler: key derivation and per-object decryption.
//!
//! Revisions 2 to 4 derive an MD5-based key and salt it per object; revisions
//! 5 and 6 unwrap a single AES-256 file key with SHA-2 hashes of the password.

use super::saslprep::saslprep;
use crate::codec::aes::{aes_cbc_decrypt, aes_cbc_encrypt, unpad_aes};
use crate::codec::arcfour::Arcfour;
use crate::error::{PdfError, Result};
use crate::model::name::Name;
use crate::model::objects::{Dict, PDFObjRef, PDFObject};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

/// Password padding string (ISO 32000-1, 7.6.3.3).
pub const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Cipher applied to one class of data (strings or streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptAlgorithm {
    Identity,
    Rc4,
    Aes128,
    Aes256,
}

/// Document-level key plus the methods the `/Encrypt` dictionary selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptKey {
    pub key: Vec<u8>,
    pub string_method: CryptAlgorithm,
    pub stream_method: CryptAlgorithm,
    /// Every usable entry of `/CF`, for streams that name their own filter.
    pub crypt_filters: FxHashMap<Name, CryptAlgorithm>,
    pub encrypt_metadata: bool,
    pub revision: i64,
}

/// Decrypts strings and stream payloads of one document.
pub trait SecurityHandler: Send + Sync {
    fn decrypt_string(&self, objref: PDFObjRef, data: &[u8]) -> Vec<u8>;

    /// `dict` is the stream dictionary; it decides metadata and crypt-filter
    /// exemptions.
    fn decrypt_stream(&self, objref: PDFObjRef, data: &[u8], dict: &Dict) -> Vec<u8>;

    /// Method of a named crypt filter, `None` when the handler cannot apply it.
    fn crypt_filter(&self, name: Name) -> Option<CryptAlgorithm>;
}

/// The `/Standard` security handler.
#[derive(Debug, Clone)]
pub struct StandardSecurityHandler {
    key: DecryptKey,
}

impl StandardSecurityHandler {
    /// Authenticate `password` against `encrypt` and keep the derived key.
    pub fn new(encrypt: &Dict, id: &[Vec<u8>], password: &str) -> Result<Self> {
        derive_document_key(encrypt, id, password).map(|key| Self { key })
    }

    pub const fn key(&self) -> &DecryptKey {
        &self.key
    }

    fn decrypt_with(&self, alg: CryptAlgorithm, objref: PDFObjRef, data: &[u8]) -> Vec<u8> {
        let key = object_key(&self.key.key, objref.objid, objref.genno, alg);
        decrypt_bytes(&key, alg, data)
    }
}

impl SecurityHandler for StandardSecurityHandler {
    fn decrypt_string(&self, objref: PDFObjRef, data: &[u8]) -> Vec<u8> {
        self.decrypt_with(self.key.string_method, objref, data)
    }

    fn decrypt_stream(&self, objref: PDFObjRef, data: &[u8], dict: &Dict) -> Vec<u8> {
        if !self.key.encrypt_metadata && dict.is_type("Metadata") {
            return data.to_vec();
        }
        let Some(name) = stream_crypt_filter(dict) else {
            return self.decrypt_with(self.key.stream_method, objref, data);
        };
        match self.crypt_filter(name) {
            Some(alg) => self.decrypt_with(alg, objref, data),
            None => {
                warn!(
                    %objref,
                    filter = name.as_str(),
                    "unknown crypt filter, stream left encrypted"
                );
                data.to_vec()
            }
        }
    }

    fn crypt_filter(&self, name: Name) -> Option<CryptAlgorithm> {
        if name == "Identity" {
            return Some(CryptAlgorithm::Identity);
        }
        self.key.crypt_filters.get(&name).copied()
    }
}

/// Name of the crypt filter a stream selects with a leading `/Crypt` entry in
/// `/Filter`. `/Name` defaults to `Identity`.
pub fn stream_crypt_filter(dict: &Dict) -> Option<Name> {
    let first = match dict.get("Filter") {
        Some(PDFObject::Name(n)) => Some(*n),
        Some(PDFObject::Array(arr)) => arr.first().and_then(|o| o.as_name().ok()),
        _ => None,
    };
    if first.is_none_or(|n| n != "Crypt") {
        return None;
    }
    let parms = match dict.get("DecodeParms") {
        Some(PDFObject::Dict(d)) => Some(d),
        Some(PDFObject::Array(arr)) => arr.first().and_then(|o| o.as_dict().ok()),
        _ => None,
    };
    Some(
        parms
            .and_then(|p| p.get_name("Name"))
            .unwrap_or_else(|| Name::new("Identity")),
    )
}

/// Derive the document key from the `/Encrypt` dictionary, the first `/ID`
/// string and a password.
///
/// The password is tried as the user password, then as the owner password.
pub fn derive_document_key(encrypt: &Dict, id: &[Vec<u8>], password: &str) -> Result<DecryptKey> {
    if let Some(filter) = encrypt.get_name("Filter")
        && filter != "Standard"
    {
        return Err(PdfError::UnsupportedEncryption(format!(
            "security handler /{}",
            filter.as_str()
        )));
    }

    let v = encrypt.get_int("V").unwrap_or(0);
    let r = require_int(encrypt, "R")?;
    let encrypt_metadata = encrypt
        .get("EncryptMetadata")
        .and_then(|o| o.as_bool().ok())
        .unwrap_or(true);
    debug!(v, r, "deriving document key");

    let mut crypt_filters = FxHashMap::default();
    let (string_method, stream_method) = match v {
        1 | 2 => (CryptAlgorithm::Rc4, CryptAlgorithm::Rc4),
        4 | 5 => {
            let cf = encrypt.get_dict("CF");
            if let Some(entries) = cf {
                for (&name, _) in entries.iter() {
                    match crypt_method(cf, Some(name)) {
                        Ok(alg) => {
                            crypt_filters.insert(name, alg);
                        }
                        Err(e) => {
                            debug!(filter = name.as_str(), error = %e, "crypt filter skipped")
                        }
                    }
                }
            }
            (
                crypt_method(cf, encrypt.get_name("StrF"))?,
                crypt_method(cf, encrypt.get_name("StmF"))?,
            )
        }
        _ => {
            return Err(PdfError::UnsupportedEncryption(format!("V={}", v)));
        }
    };

    let key = match r {
        2..=4 => {
            let length_bits = match v {
                1 => 40,
                4 => 128,
                _ => encrypt.get_int("Length").unwrap_or(40).clamp(40, 128),
            };
            let params = LegacyParams {
                revision: r,
                key_len: (length_bits / 8) as usize,
                o: require_bytes(encrypt, "O")?,
                u: require_bytes(encrypt, "U")?,
                p: require_int(encrypt, "P")? as i32,
                docid: id.first().cloned().unwrap_or_default(),
                encrypt_metadata,
            };
            params
                .authenticate_user(password.as_bytes())
                .or_else(|| params.authenticate_owner(password.as_bytes()))
        }
        5 | 6 => {
            let params = AesV3Params {
                revision: r,
                o: require_bytes(encrypt, "O")?,
                u: require_bytes(encrypt, "U")?,
                oe: require_bytes(encrypt, "OE")?,
                ue: require_bytes(encrypt, "UE")?,
            };
            params.check_lengths()?;
            params.authenticate(password)
        }
        _ => return Err(PdfError::UnsupportedEncryption(format!("R={}", r))),
    };

    let Some(key) = key else {
        return Err(PdfError::DecryptionAuthFailure);
    };
    Ok(DecryptKey {
        key,
        string_method,
        stream_method,
        crypt_filters,
        encrypt_metadata,
        revision: r,
    })
}

fn crypt_method(cf: Option<&Dict>, name: Option<Name>) -> Result<CryptAlgorithm> {
    let Some(name) = name.filter(|n| *n != "Identity") else {
        return Ok(CryptAlgorithm::Identity);
    };
    let Some(filter) = cf.and_then(|cf| cf.get_dict(name.as_str())) else {
        return Err(PdfError::EncryptionError(format!(
            "crypt filter /{} not found in /CF",
            name.as_str()
        )));
    };
    match filter.get_name("CFM").map(|n| n.as_str()) {
        None | Some("None") => Ok(CryptAlgorithm::Identity),
        Some("V2") => Ok(CryptAlgorithm::Rc4),
        Some("AESV2") => Ok(CryptAlgorithm::Aes128),
        Some("AESV3") => Ok(CryptAlgorithm::Aes256),
        Some(other) => Err(PdfError::UnsupportedEncryption(format!(
            "crypt filter method /{}",
            other
        ))),
    }
}

/// Salt the document key with an object's identity (ISO 32000-1, algorithm 1).
///
/// AES-256 uses the document key for every object.
pub fn object_key(doc_key: &[u8], objid: u32, genno: u16, alg: CryptAlgorithm) -> Vec<u8> {
    match alg {
        CryptAlgorithm::Identity | CryptAlgorithm::Aes256 => doc_key.to_vec(),
        CryptAlgorithm::Rc4 | CryptAlgorithm::Aes128 => {
            let mut ctx = md5::Context::new();
            ctx.consume(doc_key);
            ctx.consume(&objid.to_le_bytes()[..3]);
            ctx.consume(genno.to_le_bytes());
            if alg == CryptAlgorithm::Aes128 {
                ctx.consume(b"sAlT");
            }
            let digest = ctx.finalize();
            let n = (doc_key.len() + 5).min(16);
            digest.0[..n].to_vec()
        }
    }
}

/// Decrypt `data` with an object key.
///
/// AES payloads carry their IV in the first 16 bytes; a trailing partial
/// block is dropped and PKCS#7 padding removed. Payloads too short to hold an
/// IV are returned unchanged.
pub fn decrypt_bytes(key: &[u8], alg: CryptAlgorithm, data: &[u8]) -> Vec<u8> {
    match alg {
        CryptAlgorithm::Identity => data.to_vec(),
        CryptAlgorithm::Rc4 => Arcfour::new(key).process(data),
        CryptAlgorithm::Aes128 | CryptAlgorithm::Aes256 => {
            if data.len() < 16 {
                return data.to_vec();
            }
            let (iv, rest) = data.split_at(16);
            let ciphertext = &rest[..rest.len() - rest.len() % 16];
            if ciphertext.is_empty() {
                return Vec::new();
            }
            match aes_cbc_decrypt(key, iv, ciphertext) {
                Some(plain) => unpad_aes(&plain).to_vec(),
                None => {
                    warn!(key_len = key.len(), "AES key rejected, data left encrypted");
                    data.to_vec()
                }
            }
        }
    }
}

fn require_int(dict: &Dict, key: &str) -> Result<i64> {
    dict.get_int(key)
        .ok_or_else(|| PdfError::EncryptionError(format!("missing /{} in /Encrypt", key)))
}

fn require_bytes(dict: &Dict, key: &str) -> Result<Vec<u8>> {
    dict.get(key)
        .and_then(|o| o.as_string().ok())
        .map(<[u8]>::to_vec)
        .ok_or_else(|| PdfError::EncryptionError(format!("missing /{} in /Encrypt", key)))
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PASSWORD_PADDING;
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PADDING[..32 - len]);
    padded
}

/// Revisions 2 to 4.
struct LegacyParams {
    revision: i64,
    key_len: usize,
    o: Vec<u8>,
    u: Vec<u8>,
    p: i32,
    docid: Vec<u8>,
    encrypt_metadata: bool,
}

impl LegacyParams {
    /// Algorithm 2.
    fn compute_key(&self, password: &[u8]) -> Vec<u8> {
        let mut ctx = md5::Context::new();
        ctx.consume(pad_password(password));
        ctx.consume(&self.o);
        ctx.consume(self.p.to_le_bytes());
        ctx.consume(&self.docid);
        if self.revision >= 4 && !self.encrypt_metadata {
            ctx.consume([0xFF; 4]);
        }
        let mut hash = ctx.finalize().0;
        let n = self.key_len.min(16);
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = md5::compute(&hash[..n]).0;
            }
        }
        hash[..n].to_vec()
    }

    /// Algorithms 4 and 5.
    fn compute_u(&self, key: &[u8]) -> Vec<u8> {
        if self.revision == 2 {
            return Arcfour::new(key).process(&PASSWORD_PADDING);
        }
        let mut ctx = md5::Context::new();
        ctx.consume(PASSWORD_PADDING);
        ctx.consume(&self.docid);
        let mut result = Arcfour::new(key).process(&ctx.finalize().0);
        for i in 1..20u8 {
            let xor_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            result = Arcfour::new(&xor_key).process(&result);
        }
        result
    }

    fn authenticate_user(&self, password: &[u8]) -> Option<Vec<u8>> {
        let key = self.compute_key(password);
        let u = self.compute_u(&key);
        let matches = if self.revision == 2 {
            u == self.u
        } else {
            self.u.len() >= 16 && u[..16] == self.u[..16]
        };
        matches.then_some(key)
    }

    /// Algorithm 7: recover the user password from `/O`.
    fn authenticate_owner(&self, password: &[u8]) -> Option<Vec<u8>> {
        let mut hash = md5::compute(pad_password(password)).0;
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = md5::compute(hash).0;
            }
        }
        let key = &hash[..self.key_len.min(16)];
        let user_password = if self.revision == 2 {
            Arcfour::new(key).process(&self.o)
        } else {
            let mut result = self.o.clone();
            for i in (0..20u8).rev() {
                let xor_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
                result = Arcfour::new(&xor_key).process(&result);
            }
            result
        };
        self.authenticate_user(&user_password)
    }
}

/// Revisions 5 and 6.
struct AesV3Params {
    revision: i64,
    o: Vec<u8>,
    u: Vec<u8>,
    oe: Vec<u8>,
    ue: Vec<u8>,
}

impl AesV3Params {
    fn check_lengths(&self) -> Result<()> {
        let fields = [
            ("O", &self.o, 48),
            ("U", &self.u, 48),
            ("OE", &self.oe, 32),
            ("UE", &self.ue, 32),
        ];
        for (name, value, min) in fields {
            if value.len() < min {
                return Err(PdfError::EncryptionError(format!(
                    "/{} is {} bytes, expected {}",
                    name,
                    value.len(),
                    min
                )));
            }
        }
        Ok(())
    }

    fn prepare_password(&self, password: &str) -> Vec<u8> {
        let prepared = if self.revision == 6 && !password.is_empty() {
            saslprep(password).unwrap_or_else(|_| password.to_string())
        } else {
            password.to_string()
        };
        let mut bytes = prepared.into_bytes();
        bytes.truncate(127);
        bytes
    }

    fn authenticate(&self, password: &str) -> Option<Vec<u8>> {
        let pw = self.prepare_password(password);

        // User: hash(pw, validation salt) == U[0..32], key from UE.
        if self.hash(&pw, &self.u[32..40], None) == self.u[..32] {
            let kek = self.hash(&pw, &self.u[40..48], None);
            return aes_cbc_decrypt(&kek, &[0u8; 16], &self.ue[..32]);
        }

        // Owner: the same with U mixed in, key from OE.
        let u48 = &self.u[..48];
        if self.hash(&pw, &self.o[32..40], Some(u48)) == self.o[..32] {
            let kek = self.hash(&pw, &self.o[40..48], Some(u48));
            return aes_cbc_decrypt(&kek, &[0u8; 16], &self.oe[..32]);
        }
        None
    }

    fn hash(&self, password: &[u8], salt: &[u8], udata: Option<&[u8]>) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(password);
        hasher.update(salt);
        if let Some(u) = udata {
            hasher.update(u);
        }
        let k = hasher.finalize().to_vec();
        if self.revision == 5 {
            return k;
        }
        r6_hash(password, k, udata.unwrap_or(&[]))
    }
}

/// Algorithm 2.B: iterated SHA-256/384/512 over AES-128-CBC rounds.
fn r6_hash(password: &[u8], mut k: Vec<u8>, udata: &[u8]) -> Vec<u8> {
    let mut round = 0u32;
    loop {
        let block: Vec<u8> = password.iter().chain(&k).chain(udata).copied().collect();
        let k1 = block.repeat(64);
        let Some(e) = aes_cbc_encrypt(&k[..16], &k[16..32], &k1) else {
            // k1 is always a multiple of 16 bytes and k at least 32.
            return k[..32].to_vec();
        };

        k = match bytes_mod_3(&e[..16]) {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };

        round += 1;
        let last = *e.last().unwrap_or(&0) as u32;
        if round >= 64 && last <= round - 32 {
            break;
        }
    }
    k.truncate(32);
    k
}

/// Big-endian 128-bit number mod 3; 256 is 1 mod 3 so the digit sum works.
fn bytes_mod_3(input: &[u8]) -> usize {
    input.iter().map(|&b| (b % 3) as usize).sum::<usize>() % 3
}
