//! HMAC channel authentication for JSON-RPC messages.
//!
//! A `MessageSigner` stamps outgoing messages with a monotonically
//! increasing `_seq` and an `_hmac` over the canonical JSON bytes, and
//! verifies incoming messages against the shared secret. Sequence numbers
//! are strictly monotonic per verified message, which rejects replays.

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};

type HmacSha256 = Hmac<Sha256>;

/// Errors produced by [`MessageSigner::verify`] and the hex utilities.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// Message is not a JSON object
    #[error("Message must be a JSON object")]
    NotAnObject,
    /// `_hmac` or `_seq` field is missing or malformed
    #[error("Missing or malformed {field} field")]
    MissingField {
        /// The offending field name
        field: &'static str,
    },
    /// Signature did not verify
    #[error("Signature verification failed")]
    BadSignature,
    /// Sequence number was already consumed
    #[error("Replay detected: sequence {seq} is not greater than {last}")]
    Replay {
        /// Sequence carried by the rejected message
        seq: u64,
        /// Highest sequence accepted so far
        last: u64,
    },
    /// Hex string had odd length or a non-hex digit
    #[error("Invalid hex string")]
    InvalidHex,
}

/// Encode bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Decode an even-length hex string (either case) to bytes.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, SignerError> {
    if hex.len() % 2 != 0 {
        return Err(SignerError::InvalidHex);
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| SignerError::InvalidHex))
        .collect()
}

/// Signs and verifies JSON-RPC messages with a shared secret.
///
/// Both sides derive the same key from the secret, so construction is
/// deterministic and re-creating a signer from the same secret is a no-op
/// with respect to key material. Send and receive sequence state starts
/// fresh per signer.
#[derive(Debug)]
pub struct MessageSigner {
    secret: Vec<u8>,
    next_send_seq: AtomicU64,
    last_recv_seq: Mutex<Option<u64>>,
}

impl MessageSigner {
    /// Create a signer from a shared secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            next_send_seq: AtomicU64::new(0),
            last_recv_seq: Mutex::new(None),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        HmacSha256::new_from_slice(&self.secret).expect("HMAC key of any length")
    }

    /// Sign a JSON-RPC message: attach the next `_seq` and an `_hmac` over
    /// the canonical bytes of the message including `_seq`.
    pub fn sign(&self, message: &Value) -> Result<Value, SignerError> {
        let obj = message.as_object().ok_or(SignerError::NotAnObject)?;

        let seq = self.next_send_seq.fetch_add(1, Ordering::SeqCst);
        let mut signed: Map<String, Value> = obj.clone();
        signed.remove("_hmac");
        signed.insert("_seq".to_string(), Value::from(seq));

        let digest = self.digest(&signed);
        signed.insert("_hmac".to_string(), Value::String(digest));
        Ok(Value::Object(signed))
    }

    /// Verify a signed message.
    ///
    /// Accepts iff the signature verifies and `_seq` is strictly greater
    /// than the last accepted sequence; on acceptance the watermark
    /// advances and the message is returned with `_hmac` and `_seq`
    /// stripped.
    pub fn verify(&self, message: &Value) -> Result<Value, SignerError> {
        let obj = message.as_object().ok_or(SignerError::NotAnObject)?;

        let claimed = obj
            .get("_hmac")
            .and_then(Value::as_str)
            .ok_or(SignerError::MissingField { field: "_hmac" })?
            .to_string();
        let seq = obj
            .get("_seq")
            .and_then(Value::as_u64)
            .ok_or(SignerError::MissingField { field: "_seq" })?;

        let mut unsigned = obj.clone();
        unsigned.remove("_hmac");

        let claimed_bytes = hex_to_bytes(&claimed).map_err(|_| SignerError::BadSignature)?;
        let mut mac = self.mac();
        mac.update(canonical_bytes(&Value::Object(unsigned.clone())).as_slice());
        // Mac::verify_slice is constant-time
        if mac.verify_slice(&claimed_bytes).is_err() {
            return Err(SignerError::BadSignature);
        }

        // Replay window: strictly monotonic sequence per verified message
        {
            let mut last = self.last_recv_seq.lock();
            if let Some(prev) = *last {
                if seq <= prev {
                    return Err(SignerError::Replay { seq, last: prev });
                }
            }
            *last = Some(seq);
        }

        unsigned.remove("_seq");
        Ok(Value::Object(unsigned))
    }

    fn digest(&self, obj: &Map<String, Value>) -> String {
        let mut mac = self.mac();
        mac.update(canonical_bytes(&Value::Object(obj.clone())).as_slice());
        bytes_to_hex(&mac.finalize().into_bytes())
    }
}

/// Canonical JSON bytes: object keys sorted recursively so both sides hash
/// identical input regardless of insertion order.
fn canonical_bytes(value: &Value) -> Vec<u8> {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for k in keys {
                    out.insert(k.clone(), canonicalize(&map[k]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_vec(&canonicalize(value)).unwrap_or_default()
}
