use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Leading field of every card payload. It fills the first cipher block,
/// so a corrupted IV or key cannot decrypt to a payload that still parses.
pub const PAYLOAD_FORMAT: &str = "card-payload/v1";

#[derive(thiserror::Error, Debug)]
pub enum EncryptionError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid IV length (expected 16 bytes)")]
    InvalidIvLength,

    #[error("Invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// AES-256 key derived from the shared passphrase
#[derive(Clone)]
pub struct FieldKey([u8; KEY_LEN]);

impl FieldKey {
    /// Single SHA-256 of the passphrase, no salt. Kept for compatibility
    /// with data already at rest.
    pub fn derive(passphrase: &str) -> Self {
        use ring::digest;

        let hash = digest::digest(&digest::SHA256, passphrase.as_bytes());
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(hash.as_ref());
        Self(key)
    }
}

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldKey(..)")
    }
}

/// Base64 ciphertext and the IV it was produced with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub iv: String,
}

/// Encrypts with AES-256-CBC/PKCS#7 under a fresh random IV.
pub fn encrypt(key: &FieldKey, plaintext: &str) -> Result<EncryptedField, EncryptionError> {
    let rng = SystemRandom::new();

    let mut iv = [0u8; IV_LEN];
    rng.fill(&mut iv)
        .map_err(|_| EncryptionError::EncryptionFailed("Failed to generate IV".to_string()))?;

    let cipher = Aes256CbcEnc::new_from_slices(&key.0, &iv)
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(EncryptedField {
        ciphertext: STANDARD.encode(ciphertext),
        iv: STANDARD.encode(iv),
    })
}

/// Base64 that went through mail clients or form encoding arrives with
/// line breaks and spaces in it.
fn strip_whitespace(encoded: &str) -> String {
    encoded.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Decrypts a value produced by `encrypt`.
///
/// CBC carries no integrity check: a damaged IV or ciphertext can still
/// decrypt to the wrong bytes. Card data goes through `decrypt_payload`,
/// which rejects anything that is not an intact payload envelope.
pub(crate) fn decrypt(
    key: &FieldKey,
    ciphertext: &str,
    iv: &str,
) -> Result<String, EncryptionError> {
    let ciphertext = STANDARD.decode(strip_whitespace(ciphertext))?;
    let iv = STANDARD.decode(strip_whitespace(iv))?;

    if iv.len() != IV_LEN {
        return Err(EncryptionError::InvalidIvLength);
    }

    let cipher = Aes256CbcDec::new_from_slices(&key.0, &iv)
        .map_err(|e| EncryptionError::DecryptionFailed(e.to_string()))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| EncryptionError::DecryptionFailed("Bad padding".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| EncryptionError::DecryptionFailed("Invalid UTF-8".to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingAddress {
    pub line1: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

/// Sensitive card data, stored only encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardPayload {
    pub pan: String,
    pub cvv: String,
    pub pin: Option<String>, // Pos only
    pub expiry: String,      // MM/YY
    pub cardholder_name: String,
    pub billing_address: Option<BillingAddress>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PayloadEnvelope {
    format: String,
    card: CardPayload,
}

/// What a reader gets back for a card's sensitive fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DecryptedPayload {
    Available(CardPayload),
    /// Stored data exists but could not be decrypted
    Unavailable,
    /// Nothing stored
    Empty,
}

impl DecryptedPayload {
    pub fn is_available(&self) -> bool {
        matches!(self, DecryptedPayload::Available(_))
    }
}

pub fn encrypt_payload(
    key: &FieldKey,
    payload: &CardPayload,
) -> Result<EncryptedField, EncryptionError> {
    let envelope = PayloadEnvelope {
        format: PAYLOAD_FORMAT.to_string(),
        card: payload.clone(),
    };
    let plaintext = serde_json::to_string(&envelope)
        .map_err(|e| EncryptionError::EncryptionFailed(e.to_string()))?;
    encrypt(key, &plaintext)
}

fn open_payload(
    key: &FieldKey,
    ciphertext: &str,
    iv: &str,
) -> Result<CardPayload, EncryptionError> {
    let plaintext = decrypt(key, ciphertext, iv)?;
    let envelope: PayloadEnvelope = serde_json::from_str(&plaintext)
        .map_err(|e| EncryptionError::InvalidPayload(e.to_string()))?;

    if envelope.format != PAYLOAD_FORMAT {
        return Err(EncryptionError::InvalidPayload(
            "Unknown payload format".to_string(),
        ));
    }

    Ok(envelope.card)
}

/// Decrypts a stored card payload. Failures are logged and folded into
/// `Unavailable` so one bad record never breaks a whole view.
pub fn decrypt_payload(key: &FieldKey, ciphertext: &str, iv: &str) -> DecryptedPayload {
    if ciphertext.trim().is_empty() {
        return DecryptedPayload::Empty;
    }

    match open_payload(key, ciphertext, iv) {
        Ok(card) => DecryptedPayload::Available(card),
        Err(e) => {
            tracing::warn!(error = %e, "Card payload could not be decrypted");
            DecryptedPayload::Unavailable
        }
    }
}
