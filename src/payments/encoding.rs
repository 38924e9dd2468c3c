//! Canonical parameter encoding used as the exact input to the gateway signature.

use crate::payments::error::{PaymentError, PaymentResult};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;

/// Field carrying the signature itself.
pub const SECURE_HASH_FIELD: &str = "vnp_SecureHash";
/// Optional companion field naming the hash algorithm.
pub const SECURE_HASH_TYPE_FIELD: &str = "vnp_SecureHashType";

const SIGNATURE_FIELDS: [&str; 2] = [SECURE_HASH_FIELD, SECURE_HASH_TYPE_FIELD];

/// Characters left as-is by the gateway's encoder; everything else is escaped.
const GATEWAY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A string-keyed parameter set with unique keys, iterated in byte order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayParams {
    entries: BTreeMap<String, String>,
}

impl GatewayParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a parameter set, rejecting any key that appears twice.
    pub fn from_pairs<I, K, V>(pairs: I) -> PaymentResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            params.insert(key, value)?;
        }
        Ok(params)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> PaymentResult<()> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(PaymentError::malformed(format!("duplicate parameter: {}", key)));
        }
        self.entries.insert(key, value.into());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Canonical `key=value&...` form, signature fields excluded.
    pub fn canonical(&self) -> String {
        encode_canonical(self)
    }
}

/// Percent-encodes one key or value the way the gateway does, with spaces as `+`.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, GATEWAY_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

pub fn encode_canonical(params: &GatewayParams) -> String {
    params
        .iter()
        .filter(|(key, _)| !SIGNATURE_FIELDS.contains(key))
        .map(|(key, value)| format!("{}={}", encode_component(key), encode_component(value)))
        .collect::<Vec<_>>()
        .join("&")
}
