//! Per-client session state and the handshake / command protocol.
//!
//! One [`Session`] exists per client public key. Its state machine:
//!
//!   NEW ── connect ──► NONCE_ISSUED ── get_token (valid) ──► KEYED
//!
//! `connect` is idempotent; `get_token` after keying returns the cached
//! token unchanged; clearing the key (rekey) drops the session back to
//! NONCE_ISSUED and commands fail until a new `get_token` completes.
//!
//! Mutation is serialized by the caller: the registry hands sessions out
//! as `Arc<Mutex<Session>>` and the router locks for the whole request.

use thiserror::Error;

use arx_core::codec::{self, CodecError, Dict, Value};
use arx_core::crypto::{
    self, ClientPublicKey, CryptoError, NodeKeypair, SymmetricKey, SERVER_NONCE_LEN,
};
use arx_core::errors::{ErrorRecord, Errors};

use crate::backend::NodeBackend;

/// A structured error carrying a protocol [`ErrorRecord`].
///
/// Handlers return this instead of unwinding; the router and the command
/// envelope shape it into the response.
#[derive(Debug, Clone, Error)]
#[error("client error: {0}")]
pub struct ClientError(ErrorRecord);

impl ClientError {
    pub fn new(code: Errors, object: impl Into<String>, message: impl Into<String>) -> Self {
        Self(ErrorRecord::new(code, object, message))
    }

    pub fn record(&self) -> &ErrorRecord {
        &self.0
    }

    pub fn into_record(self) -> ErrorRecord {
        self.0
    }
}

#[derive(Debug, Error)]
enum TokenError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Per-client handshake and crypto state.
pub struct Session {
    public_key: ClientPublicKey,
    session_id: i64,
    server_nonce: Option<Vec<u8>>,
    session_key: Option<SymmetricKey>,
    /// Ciphertext delivering `session_key` to the client; cached so
    /// repeated `get_token` calls return identical material.
    encrypted_answer: Option<Vec<u8>>,
    errors: Vec<ErrorRecord>,
}

impl Session {
    pub(crate) fn new(public_key: ClientPublicKey, session_id: i64) -> Self {
        Self {
            public_key,
            session_id,
            server_nonce: None,
            session_key: None,
            encrypted_answer: None,
            errors: Vec::new(),
        }
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn public_key(&self) -> &ClientPublicKey {
        &self.public_key
    }

    pub fn server_nonce(&self) -> Option<&[u8]> {
        self.server_nonce.as_deref()
    }

    pub fn is_keyed(&self) -> bool {
        self.session_key.is_some()
    }

    /// First handshake step. Generates the server nonce on first call and
    /// returns it unchanged afterwards.
    pub fn connect(&mut self) -> Dict {
        let nonce = self
            .server_nonce
            .get_or_insert_with(|| crypto::random_bytes(SERVER_NONCE_LEN))
            .clone();
        Dict::new()
            .with("server_nonce", nonce)
            .with("session_id", self.session_id)
    }

    /// Second handshake step. Validates the client-signed
    /// `{server_nonce, client_nonce}` blob and returns the node-signed
    /// token carrying the session key sealed to the client.
    ///
    /// Returns `None` on failure, with the cause accumulated on the
    /// session; the router merges it into the response via [`answer`].
    ///
    /// [`answer`]: Session::answer
    pub fn get_token(&mut self, node_key: &NodeKeypair, params: &Dict) -> Option<Dict> {
        match self.try_get_token(node_key, params) {
            Ok(token) => token,
            Err(err) => {
                self.add_error(
                    Errors::BadValue,
                    "signed_data",
                    format!("wrong or tampered data block: {err}"),
                );
                None
            }
        }
    }

    fn try_get_token(
        &mut self,
        node_key: &NodeKeypair,
        params: &Dict,
    ) -> Result<Option<Dict>, TokenError> {
        let signed = params.get_bytes("data")?;
        let signature = params.get_bytes("signature")?;
        if !self.public_key.verify(signed, signature) {
            self.add_error(Errors::BadValue, "signed_data", "signature does not verify");
            return Ok(None);
        }

        let reply = codec::unpack(signed)?;
        let client_nonce = reply.get_bytes("client_nonce")?.to_vec();
        if self.server_nonce.as_deref() != Some(reply.get_bytes("server_nonce")?) {
            self.add_error(Errors::BadValue, "server_nonce", "does not match");
            return Ok(None);
        }

        let encrypted_token = self.session_token()?;
        let outer = Dict::new()
            .with("client_nonce", client_nonce)
            .with("encrypted_token", encrypted_token);
        let packed = codec::pack(&outer)?;
        let signature = node_key.sign(&packed);
        Ok(Some(
            Dict::new().with("data", packed).with("signature", signature),
        ))
    }

    /// Return the cached encrypted token, generating key and token on the
    /// first keyed call. Key and cached answer are set together.
    fn session_token(&mut self) -> Result<Vec<u8>, TokenError> {
        if let (Some(_), Some(cached)) = (&self.session_key, &self.encrypted_answer) {
            return Ok(cached.clone());
        }
        let key = SymmetricKey::generate();
        let blob = codec::pack(&Dict::new().with("sk", key.pack()))?;
        let sealed = self.public_key.seal(&blob)?;
        self.session_key = Some(key);
        self.encrypted_answer = Some(sealed.clone());
        Ok(sealed)
    }

    /// Authenticated command envelope: decrypt, dispatch, encrypt.
    ///
    /// Dispatch failures travel back encrypted as `{error: record}`.
    /// Without a session key there is nothing to encrypt under, so the
    /// failure surfaces as a plain [`ClientError`].
    pub fn command(&mut self, node: &dyn NodeBackend, params: &Dict) -> Result<Dict, ClientError> {
        let key = self.session_key.as_ref().ok_or_else(|| {
            ClientError::new(Errors::CommandFailed, "", "no session key established")
        })?;

        let reply = match Self::run_command(key, node, params) {
            Ok(result) => Dict::new().with("result", result),
            Err(err) => Dict::new().with("error", err.record().to_dict()),
        };

        let packed = codec::pack(&reply)
            .map_err(|e| ClientError::new(Errors::CommandFailed, "", e.to_string()))?;
        let ciphertext = key
            .encrypt(&packed)
            .map_err(|e| ClientError::new(Errors::CommandFailed, "", e.to_string()))?;
        Ok(Dict::new().with("result", ciphertext))
    }

    fn run_command(
        key: &SymmetricKey,
        node: &dyn NodeBackend,
        params: &Dict,
    ) -> Result<Dict, ClientError> {
        let ciphertext = params
            .get_bytes("params")
            .map_err(|e| ClientError::new(Errors::CommandFailed, "", e.to_string()))?;
        let plain = key
            .decrypt(ciphertext)
            .map_err(|e| ClientError::new(Errors::CommandFailed, "", e.to_string()))?;
        let inner = codec::unpack(&plain)
            .map_err(|e| ClientError::new(Errors::CommandFailed, "", e.to_string()))?;
        dispatch(node, &inner)
    }

    /// Merge accumulated errors into `result` under the `errors` key.
    pub fn answer(&mut self, result: Option<Dict>) -> Dict {
        let mut result = result.unwrap_or_default();
        if !self.errors.is_empty() {
            let errors: Vec<Value> = self
                .errors
                .iter()
                .map(|record| Value::Map(record.to_dict()))
                .collect();
            result.put("errors", errors);
        }
        result
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn add_error(&mut self, code: Errors, object: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ErrorRecord::new(code, object, message));
    }

    pub fn add_record(&mut self, record: ErrorRecord) {
        self.errors.push(record);
    }

    /// Forget the session key and the cached token. The next command
    /// fails until the client completes a fresh `get_token`.
    pub fn drop_key(&mut self) {
        self.session_key = None;
        self.encrypted_answer = None;
    }
}

/// Inner command dispatch. The built-in set is closed; everything else is
/// offered to the backend.
fn dispatch(node: &dyn NodeBackend, params: &Dict) -> Result<Dict, ClientError> {
    let command = params
        .get_str("command")
        .map_err(|e| ClientError::new(Errors::CommandFailed, "", e.to_string()))?;
    match command {
        "hello" => Ok(Dict::new()
            .with("status", "OK")
            .with("message", "welcome to the Universa")),
        "sping" => Ok(Dict::new().with("sping", "spong")),
        "test_error" => Err(ClientError::new(
            Errors::CommandFailed,
            "test_error",
            "sample error",
        )),
        other => match node.execute(other, params) {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(ClientError::new(
                Errors::UnknownCommand,
                "command",
                format!("unknown: {other}"),
            )),
            Err(err) => Err(ClientError::new(Errors::CommandFailed, other, err.to_string())),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
