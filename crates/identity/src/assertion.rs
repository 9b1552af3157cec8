//! Signed device assertions.
//!
//! A device proves its identity with two statements signed by a trusted
//! authority: a `model` assertion and a `serial` assertion. On the wire each
//! assertion is a header block, a blank line, and a base64 Ed25519 signature
//! over the exact bytes of the header block:
//!
//! ```text
//! type: serial
//! authority-id: example
//! sign-key-id: 5c1e...
//! brand-id: example
//! model: drone-1000
//! serial: DR1000A111
//! device-key:
//!   AcbBTQRWhcGAARAA...
//!   KWW9PSTrhp5e3F2K...
//!
//! 9m2WXnc0Yd7nA1B9...
//! ```
//!
//! Multi-line text is written on indented continuation lines, lists as
//! `  - item` lines. Consecutive assertions are separated by a blank line.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use iotid_core::TrustedKey;
use rand::rngs::OsRng;
use tracing::debug;

use crate::error::{IdentityError, IdentityResult};

pub const HEADER_TYPE: &str = "type";
pub const HEADER_AUTHORITY: &str = "authority-id";
pub const HEADER_SIGN_KEY: &str = "sign-key-id";

const RESERVED_HEADERS: [&str; 3] = [HEADER_TYPE, HEADER_AUTHORITY, HEADER_SIGN_KEY];

/// Assertion types that take part in enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionKind {
    Model,
    Serial,
}

impl AssertionKind {
    pub fn from_type(type_name: &str) -> Option<Self> {
        match type_name {
            "model" => Some(AssertionKind::Model),
            "serial" => Some(AssertionKind::Serial),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssertionKind::Model => "model",
            AssertionKind::Serial => "serial",
        }
    }
}

impl fmt::Display for AssertionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of an assertion header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    List(Vec<String>),
}

impl HeaderValue {
    pub fn text(value: impl Into<String>) -> Self {
        HeaderValue::Text(value.into())
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

/// A decoded assertion with typed header access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    type_name: String,
    headers: BTreeMap<String, HeaderValue>,
}

impl Assertion {
    /// Build an assertion from headers; `type` must be present as text.
    pub fn new(headers: BTreeMap<String, HeaderValue>) -> IdentityResult<Self> {
        let type_name = match headers.get(HEADER_TYPE) {
            Some(HeaderValue::Text(t)) => t.clone(),
            Some(HeaderValue::List(_)) => {
                return Err(IdentityError::AssertionType(
                    "header `type` must be text".to_string(),
                ))
            }
            None => return Err(IdentityError::MissingHeader(HEADER_TYPE.to_string())),
        };
        Ok(Self { type_name, headers })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// `None` for types that play no role in enrollment.
    pub fn kind(&self) -> Option<AssertionKind> {
        AssertionKind::from_type(&self.type_name)
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Text header that must be present.
    pub fn header_str(&self, name: &str) -> IdentityResult<&str> {
        self.optional_header_str(name)?
            .ok_or_else(|| IdentityError::MissingHeader(name.to_string()))
    }

    /// Text header that may be absent.
    pub fn optional_header_str(&self, name: &str) -> IdentityResult<Option<&str>> {
        match self.headers.get(name) {
            None => Ok(None),
            Some(HeaderValue::Text(value)) => Ok(Some(value)),
            Some(HeaderValue::List(_)) => Err(IdentityError::AssertionType(format!(
                "header `{name}` of {} assertion must be text, found a list",
                self.type_name
            ))),
        }
    }
}

fn invalid(message: impl Into<String>) -> IdentityError {
    IdentityError::InvalidAssertion(message.into())
}

fn is_valid_header_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Header value while its continuation lines are still being read.
enum Pending {
    Empty,
    Inline(String),
    Text(Vec<String>),
    List(Vec<String>),
}

impl Pending {
    fn finish(self) -> HeaderValue {
        match self {
            Pending::Empty => HeaderValue::Text(String::new()),
            Pending::Inline(value) => HeaderValue::Text(value),
            Pending::Text(lines) => HeaderValue::Text(lines.join("\n")),
            Pending::List(items) => HeaderValue::List(items),
        }
    }
}

fn parse_headers(block: &str) -> IdentityResult<BTreeMap<String, HeaderValue>> {
    fn flush(
        entry: Option<(String, Pending)>,
        headers: &mut BTreeMap<String, HeaderValue>,
    ) -> IdentityResult<()> {
        if let Some((name, pending)) = entry {
            if headers.insert(name.clone(), pending.finish()).is_some() {
                return Err(invalid(format!("repeated header `{name}`")));
            }
        }
        Ok(())
    }

    let mut headers = BTreeMap::new();
    let mut current: Option<(String, Pending)> = None;

    for line in block.split('\n') {
        if let Some(item) = line.strip_prefix("  - ") {
            match current.as_mut() {
                Some((_, pending @ Pending::Empty)) => {
                    *pending = Pending::List(vec![item.to_string()])
                }
                Some((_, Pending::List(items))) => items.push(item.to_string()),
                _ => return Err(invalid(format!("unexpected list item `{item}`"))),
            }
        } else if let Some(text) = line.strip_prefix("  ") {
            match current.as_mut() {
                Some((_, pending @ Pending::Empty)) => {
                    *pending = Pending::Text(vec![text.to_string()])
                }
                Some((_, Pending::Text(lines))) => lines.push(text.to_string()),
                _ => return Err(invalid(format!("unexpected continuation line `{text}`"))),
            }
        } else {
            flush(current.take(), &mut headers)?;

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| invalid(format!("malformed header line `{line}`")))?;
            if !is_valid_header_name(name) {
                return Err(invalid(format!("invalid header name `{name}`")));
            }
            let value = value.strip_prefix(' ').unwrap_or(value);
            let pending = if value.is_empty() {
                Pending::Empty
            } else {
                Pending::Inline(value.to_string())
            };
            current = Some((name.to_string(), pending));
        }
    }
    flush(current, &mut headers)?;

    Ok(headers)
}

/// Hex BLAKE3 digest of an Ed25519 public key.
pub fn sign_key_id(key: &VerifyingKey) -> String {
    hex::encode(blake3::hash(key.as_bytes()).as_bytes())
}

struct TrustedAuthority {
    authority_id: String,
    key: VerifyingKey,
}

/// Parses assertion streams and verifies their signatures.
#[derive(Default)]
pub struct AssertionDecoder {
    /// sign-key-id -> authority
    trusted: HashMap<String, TrustedAuthority>,
}

impl AssertionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `key` to sign for `authority_id`; returns its sign-key-id.
    pub fn trust(&mut self, authority_id: impl Into<String>, key: VerifyingKey) -> String {
        let id = sign_key_id(&key);
        self.trusted.insert(
            id.clone(),
            TrustedAuthority {
                authority_id: authority_id.into(),
                key,
            },
        );
        id
    }

    pub fn with_trusted_key(mut self, authority_id: impl Into<String>, key: VerifyingKey) -> Self {
        self.trust(authority_id, key);
        self
    }

    /// Build a decoder from configured hex public keys.
    pub fn from_trusted_keys(keys: &[TrustedKey]) -> IdentityResult<Self> {
        let mut decoder = Self::new();
        for trusted in keys {
            let bytes: [u8; 32] = hex::decode(&trusted.public_key_hex)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| {
                    IdentityError::Validation(format!(
                        "trusted key for `{}` must be 32 hex-encoded bytes",
                        trusted.authority_id
                    ))
                })?;
            let key = VerifyingKey::from_bytes(&bytes).map_err(|e| {
                IdentityError::Validation(format!(
                    "trusted key for `{}` is not an Ed25519 key: {e}",
                    trusted.authority_id
                ))
            })?;
            decoder.trust(trusted.authority_id.clone(), key);
        }
        Ok(decoder)
    }

    pub fn trusted_key_count(&self) -> usize {
        self.trusted.len()
    }

    /// Decode and verify every assertion in `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> IdentityResult<Vec<Assertion>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| invalid("assertion stream is not valid UTF-8"))?;

        let mut assertions = Vec::new();
        let mut rest = text.trim_start_matches('\n');
        while !rest.trim().is_empty() {
            let (block, after) = rest
                .split_once("\n\n")
                .ok_or_else(|| invalid("assertion is not signed"))?;
            let (signature, next) = after.split_once("\n\n").unwrap_or((after, ""));

            assertions.push(self.verify(block, signature)?);
            rest = next.trim_start_matches('\n');
        }

        debug!(count = assertions.len(), "decoded assertion stream");
        Ok(assertions)
    }

    /// Decode a stream that must hold exactly two assertions.
    pub fn decode_pair(&self, bytes: &[u8]) -> IdentityResult<(Assertion, Assertion)> {
        let mut assertions = self.decode(bytes)?;
        if assertions.len() != 2 {
            return Err(invalid(format!(
                "expected exactly 2 assertions, found {}",
                assertions.len()
            )));
        }
        let second = assertions.remove(1);
        let first = assertions.remove(0);
        Ok((first, second))
    }

    fn verify(&self, block: &str, signature: &str) -> IdentityResult<Assertion> {
        let headers = parse_headers(block)?;

        let text = |name: &str| match headers.get(name) {
            Some(HeaderValue::Text(value)) if !value.is_empty() => Ok(value.as_str()),
            _ => Err(invalid(format!("header `{name}` is required"))),
        };
        text(HEADER_TYPE)?;
        let authority_id = text(HEADER_AUTHORITY)?;
        let key_id = text(HEADER_SIGN_KEY)?;

        let authority = self
            .trusted
            .get(key_id)
            .ok_or_else(|| invalid(format!("signing key `{key_id}` is not trusted")))?;
        if authority.authority_id != authority_id {
            return Err(invalid(format!(
                "signing key `{key_id}` does not belong to authority `{authority_id}`"
            )));
        }

        let encoded: String = signature.split_whitespace().collect();
        if encoded.is_empty() {
            return Err(invalid("assertion is not signed"));
        }
        let raw = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| invalid(format!("signature is not base64: {e}")))?;
        let raw: [u8; 64] = raw
            .try_into()
            .map_err(|_| invalid("signature must be 64 bytes"))?;
        authority
            .key
            .verify_strict(block.as_bytes(), &Signature::from_bytes(&raw))
            .map_err(|_| invalid(format!("bad signature from authority `{authority_id}`")))?;

        Assertion::new(headers)
    }
}

/// Produces signed assertions in the wire format.
pub struct AssertionSigner {
    authority_id: String,
    key: SigningKey,
}

impl AssertionSigner {
    pub fn new(authority_id: impl Into<String>, key: SigningKey) -> Self {
        Self {
            authority_id: authority_id.into(),
            key,
        }
    }

    /// Signer with a freshly generated key.
    pub fn generate(authority_id: impl Into<String>) -> Self {
        Self::new(authority_id, SigningKey::generate(&mut OsRng))
    }

    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    pub fn sign_key_id(&self) -> String {
        sign_key_id(&self.key.verifying_key())
    }

    /// Encode and sign one assertion. The result ends with a newline, so
    /// joining two results with `"\n"` yields a valid stream.
    pub fn sign(&self, type_name: &str, headers: &[(&str, HeaderValue)]) -> IdentityResult<String> {
        let mut block = String::new();
        write_header(&mut block, HEADER_TYPE, &HeaderValue::text(type_name))?;
        write_header(
            &mut block,
            HEADER_AUTHORITY,
            &HeaderValue::text(self.authority_id.as_str()),
        )?;
        write_header(&mut block, HEADER_SIGN_KEY, &HeaderValue::text(self.sign_key_id()))?;

        for (name, value) in headers {
            if RESERVED_HEADERS.contains(name) {
                return Err(invalid(format!("header `{name}` is set by the signer")));
            }
            write_header(&mut block, name, value)?;
        }

        // Drop the final newline: the signed block ends at its last header line
        block.pop();
        let signature = self.key.sign(block.as_bytes());
        Ok(format!(
            "{block}\n\n{}\n",
            STANDARD.encode(signature.to_bytes())
        ))
    }
}

fn write_header(out: &mut String, name: &str, value: &HeaderValue) -> IdentityResult<()> {
    if !is_valid_header_name(name) {
        return Err(invalid(format!("invalid header name `{name}`")));
    }
    out.push_str(name);
    out.push(':');

    match value {
        HeaderValue::Text(text) if text.contains('\n') => {
            for line in text.split('\n') {
                if line.starts_with("- ") {
                    return Err(invalid(format!(
                        "text of header `{name}` has a line starting with `- `"
                    )));
                }
                out.push_str("\n  ");
                out.push_str(line);
            }
        }
        HeaderValue::Text(text) if !text.is_empty() => {
            out.push(' ');
            out.push_str(text);
        }
        HeaderValue::Text(_) => {}
        HeaderValue::List(items) => {
            if items.is_empty() {
                return Err(invalid(format!("list header `{name}` is empty")));
            }
            for item in items {
                if item.contains('\n') {
                    return Err(invalid(format!(
                        "item of list header `{name}` spans lines"
                    )));
                }
                out.push_str("\n  - ");
                out.push_str(item);
            }
        }
    }
    out.push('\n');
    Ok(())
}
