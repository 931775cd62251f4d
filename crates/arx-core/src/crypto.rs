//! Cryptographic primitives for arx.
//!
//! Three key roles:
//!   1. The node identity — an Ed25519 signing key; every token the
//!      endpoint issues is signed with it.
//!   2. The client identity — an Ed25519 verifying key paired with an
//!      X25519 encryption key, packed together as 64 bytes. The endpoint
//!      verifies client signatures with the first half and seals the
//!      session key to the second.
//!   3. The session key — a 256-bit symmetric key driving a
//!      ChaCha20-Poly1305 AEAD for all command traffic.
//!
//! Ed25519 hashes with SHA-512 internally. Sealing is ephemeral-static
//! X25519 with a BLAKE3-derived AEAD key. Secret key material is wiped on
//! drop. There is no unsafe code in this module.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use x25519_dalek::{PublicKey as ExchangePublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of the server nonce issued on `connect`.
pub const SERVER_NONCE_LEN: usize = 48;

/// Packed client key: 32 bytes Ed25519 verifying key, 32 bytes X25519
/// encryption key.
pub const PACKED_CLIENT_KEY_LEN: usize = 64;

/// Domain separation for the sealed-box key derivation. Changing this
/// string invalidates every token in flight.
const SEAL_CONTEXT: &str = "arx client endpoint seal v1";

const AEAD_NONCE_LEN: usize = 12;
const AEAD_TAG_LEN: usize = 16;

/// Generate `len` cryptographically random bytes.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

// ── Node identity ─────────────────────────────────────────────────────────────

/// The node's long-term Ed25519 signing key.
pub struct NodeKeypair {
    signing: SigningKey,
}

impl NodeKeypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct from a stored 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    /// Serialize the seed for persistent storage. Store securely.
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    pub fn public(&self) -> NodePublicKey {
        NodePublicKey {
            verify: self.signing.verifying_key(),
        }
    }

    /// Sign `data`, returning the 64-byte detached signature.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing.sign(data).to_bytes().to_vec()
    }
}

/// The node's public key as distributed to clients and the roster.
#[derive(Debug, Clone)]
pub struct NodePublicKey {
    verify: VerifyingKey,
}

impl NodePublicKey {
    pub fn pack(&self) -> Vec<u8> {
        self.verify.to_bytes().to_vec()
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::BadKeyLength(bytes.len()))?;
        let verify = VerifyingKey::from_bytes(&raw).map_err(|_| CryptoError::BadKeyMaterial)?;
        Ok(Self { verify })
    }

    /// Verify a detached signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.verify.verify_strict(data, &signature).is_ok()
    }
}

// ── Client identity ───────────────────────────────────────────────────────────

/// A client's public identity: signature verification plus sealing.
#[derive(Debug, Clone)]
pub struct ClientPublicKey {
    verify: VerifyingKey,
    exchange: ExchangePublicKey,
}

impl ClientPublicKey {
    /// Parse the 64-byte packed form. Fails on wrong length or an invalid
    /// Ed25519 point.
    pub fn unpack(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != PACKED_CLIENT_KEY_LEN {
            return Err(CryptoError::BadKeyLength(bytes.len()));
        }
        let verify_raw: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| CryptoError::BadKeyMaterial)?;
        let exchange_raw: [u8; 32] = bytes[32..]
            .try_into()
            .map_err(|_| CryptoError::BadKeyMaterial)?;
        let verify =
            VerifyingKey::from_bytes(&verify_raw).map_err(|_| CryptoError::BadKeyMaterial)?;
        Ok(Self {
            verify,
            exchange: ExchangePublicKey::from(exchange_raw),
        })
    }

    /// The packed 64-byte form; also the session registry's map key.
    pub fn packed(&self) -> [u8; PACKED_CLIENT_KEY_LEN] {
        let mut out = [0u8; PACKED_CLIENT_KEY_LEN];
        out[..32].copy_from_slice(&self.verify.to_bytes());
        out[32..].copy_from_slice(self.exchange.as_bytes());
        out
    }

    pub fn pack(&self) -> Vec<u8> {
        self.packed().to_vec()
    }

    /// Verify a detached client signature over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.verify.verify_strict(data, &signature).is_ok()
    }

    /// Encrypt `plaintext` so only the holder of the matching
    /// [`ClientKeypair`] can read it.
    ///
    /// Output layout: 32-byte ephemeral X25519 public key, then the AEAD
    /// ciphertext. The AEAD key is derived fresh per call, so the nonce is
    /// fixed and never reused.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = StaticSecret::random_from_rng(rand::thread_rng());
        let ephemeral_public = ExchangePublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.exchange);
        let key = seal_key(&shared, &ephemeral_public, &self.exchange);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&[0u8; AEAD_NONCE_LEN]), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut out = Vec::with_capacity(32 + ciphertext.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// A client's full keypair — the counterpart of [`ClientPublicKey`].
///
/// The endpoint itself never holds one of these; they belong to client
/// implementations and the test harness.
pub struct ClientKeypair {
    signing: SigningKey,
    exchange: StaticSecret,
}

impl ClientKeypair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
            exchange: StaticSecret::random_from_rng(rand::thread_rng()),
        }
    }

    pub fn public(&self) -> ClientPublicKey {
        ClientPublicKey {
            verify: self.signing.verifying_key(),
            exchange: ExchangePublicKey::from(&self.exchange),
        }
    }

    /// Sign `data`, returning the 64-byte detached signature.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing.sign(data).to_bytes().to_vec()
    }

    /// Open a blob produced by [`ClientPublicKey::seal`].
    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < 32 + AEAD_TAG_LEN {
            return Err(CryptoError::CiphertextTooShort(sealed.len()));
        }
        let ephemeral_raw: [u8; 32] = sealed[..32]
            .try_into()
            .map_err(|_| CryptoError::BadKeyMaterial)?;
        let ephemeral_public = ExchangePublicKey::from(ephemeral_raw);
        let recipient = ExchangePublicKey::from(&self.exchange);
        let shared = self.exchange.diffie_hellman(&ephemeral_public);
        let key = seal_key(&shared, &ephemeral_public, &recipient);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&[0u8; AEAD_NONCE_LEN]), &sealed[32..])
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Derive the sealed-box AEAD key. Binding both public keys into the
/// derivation ties the ciphertext to this exact sender/recipient pair.
fn seal_key(
    shared: &SharedSecret,
    ephemeral: &ExchangePublicKey,
    recipient: &ExchangePublicKey,
) -> [u8; 32] {
    let mut material = Vec::with_capacity(96);
    material.extend_from_slice(shared.as_bytes());
    material.extend_from_slice(ephemeral.as_bytes());
    material.extend_from_slice(recipient.as_bytes());
    let key = blake3::derive_key(SEAL_CONTEXT, &material);
    material.zeroize();
    key
}

// ── Session key ───────────────────────────────────────────────────────────────

/// A 256-bit symmetric session key.
///
/// Each `encrypt` call draws a fresh random 96-bit nonce and prepends it
/// to the ciphertext. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SymmetricKey").field(&"<redacted>").finish()
    }
}

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn pack(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::BadKeyLength(bytes.len()))?;
        Ok(Self(raw))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; AEAD_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;
        let mut out = Vec::with_capacity(AEAD_NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Returns an error if the blob is truncated, tampered with, or was
    /// encrypted under another key.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < AEAD_NONCE_LEN + AEAD_TAG_LEN {
            return Err(CryptoError::CiphertextTooShort(data.len()));
        }
        let (nonce, ciphertext) = data.split_at(AEAD_NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("packed key has wrong length: {0} bytes")]
    BadKeyLength(usize),

    #[error("invalid key material")]
    BadKeyMaterial,

    #[error("ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),

    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed or data tampered")]
    DecryptFailed,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Node identity ─────────────────────────────────────────────────────────

    #[test]
    fn node_sign_verify_round_trip() {
        let node = NodeKeypair::generate();
        let signature = node.sign(b"signed payload");
        assert!(node.public().verify(b"signed payload", &signature));
    }

    #[test]
    fn node_verify_rejects_tampered_data() {
        let node = NodeKeypair::generate();
        let signature = node.sign(b"signed payload");
        assert!(!node.public().verify(b"signed payloae", &signature));
    }

    #[test]
    fn node_verify_rejects_malformed_signature() {
        let node = NodeKeypair::generate();
        assert!(!node.public().verify(b"data", b"too short"));
    }

    #[test]
    fn node_key_seed_round_trip() {
        let node = NodeKeypair::generate();
        let restored = NodeKeypair::from_seed(*node.seed());
        assert_eq!(node.public().pack(), restored.public().pack());
    }

    #[test]
    fn node_public_unpack_rejects_wrong_length() {
        assert_eq!(
            NodePublicKey::unpack(&[0u8; 31]).unwrap_err(),
            CryptoError::BadKeyLength(31)
        );
    }

    // ── Client identity ───────────────────────────────────────────────────────

    #[test]
    fn client_key_pack_unpack_round_trip() {
        let client = ClientKeypair::generate();
        let packed = client.public().pack();
        assert_eq!(packed.len(), PACKED_CLIENT_KEY_LEN);
        let recovered = ClientPublicKey::unpack(&packed).unwrap();
        assert_eq!(recovered.packed(), client.public().packed());
    }

    #[test]
    fn client_key_unpack_rejects_wrong_length() {
        assert_eq!(
            ClientPublicKey::unpack(&[0u8; 63]).unwrap_err(),
            CryptoError::BadKeyLength(63)
        );
    }

    #[test]
    fn client_sign_verify_round_trip() {
        let client = ClientKeypair::generate();
        let signature = client.sign(b"challenge");
        assert!(client.public().verify(b"challenge", &signature));
        assert!(!client.public().verify(b"challengf", &signature));
    }

    #[test]
    fn signature_from_other_key_is_rejected() {
        let honest = ClientKeypair::generate();
        let imposter = ClientKeypair::generate();
        let signature = imposter.sign(b"challenge");
        assert!(!honest.public().verify(b"challenge", &signature));
    }

    // ── Sealing ───────────────────────────────────────────────────────────────

    #[test]
    fn seal_unseal_round_trip() {
        let client = ClientKeypair::generate();
        let sealed = client.public().seal(b"session key bytes").unwrap();
        assert_eq!(client.unseal(&sealed).unwrap(), b"session key bytes");
    }

    #[test]
    fn sealed_blobs_differ_per_call() {
        let client = ClientKeypair::generate();
        let a = client.public().seal(b"same plaintext").unwrap();
        let b = client.public().seal(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unseal_rejects_tampering() {
        let client = ClientKeypair::generate();
        let mut sealed = client.public().seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(client.unseal(&sealed).unwrap_err(), CryptoError::DecryptFailed);
    }

    #[test]
    fn unseal_rejects_wrong_recipient() {
        let intended = ClientKeypair::generate();
        let other = ClientKeypair::generate();
        let sealed = intended.public().seal(b"secret").unwrap();
        assert!(other.unseal(&sealed).is_err());
    }

    #[test]
    fn unseal_rejects_truncated_blob() {
        let client = ClientKeypair::generate();
        assert_eq!(
            client.unseal(&[0u8; 40]).unwrap_err(),
            CryptoError::CiphertextTooShort(40)
        );
    }

    // ── Session key ───────────────────────────────────────────────────────────

    #[test]
    fn symmetric_encrypt_decrypt_round_trip() {
        let key = SymmetricKey::generate();
        let ciphertext = key.encrypt(b"command payload").unwrap();
        assert_ne!(&ciphertext[AEAD_NONCE_LEN..], b"command payload");
        assert_eq!(key.decrypt(&ciphertext).unwrap(), b"command payload");
    }

    #[test]
    fn symmetric_nonces_are_fresh() {
        let key = SymmetricKey::generate();
        let a = key.encrypt(b"payload").unwrap();
        let b = key.encrypt(b"payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn symmetric_decrypt_rejects_tampering() {
        let key = SymmetricKey::generate();
        let mut ciphertext = key.encrypt(b"payload").unwrap();
        ciphertext[AEAD_NONCE_LEN] ^= 0xff;
        assert_eq!(key.decrypt(&ciphertext).unwrap_err(), CryptoError::DecryptFailed);
    }

    #[test]
    fn symmetric_decrypt_rejects_wrong_key() {
        let key = SymmetricKey::generate();
        let other = SymmetricKey::generate();
        let ciphertext = key.encrypt(b"payload").unwrap();
        assert_eq!(other.decrypt(&ciphertext).unwrap_err(), CryptoError::DecryptFailed);
    }

    #[test]
    fn symmetric_decrypt_rejects_truncation() {
        let key = SymmetricKey::generate();
        assert!(key.decrypt(&[0u8; 10]).is_err());
    }

    #[test]
    fn symmetric_key_pack_unpack_round_trip() {
        let key = SymmetricKey::generate();
        let restored = SymmetricKey::unpack(&key.pack()).unwrap();
        let ciphertext = key.encrypt(b"payload").unwrap();
        assert_eq!(restored.decrypt(&ciphertext).unwrap(), b"payload");
    }

    #[test]
    fn symmetric_key_unpack_rejects_wrong_length() {
        assert_eq!(
            SymmetricKey::unpack(&[0u8; 16]).unwrap_err(),
            CryptoError::BadKeyLength(16)
        );
    }

    #[test]
    fn random_bytes_are_distinct() {
        assert_ne!(random_bytes(SERVER_NONCE_LEN), random_bytes(SERVER_NONCE_LEN));
    }
}
