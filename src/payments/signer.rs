use crate::payments::encoding::GatewayParams;
use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Pre-shared signing secret. Never printed, not even through `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct HashSecret(String);

impl HashSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Debug for HashSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HashSecret(***)")
    }
}

/// Signs and verifies gateway parameter sets with HMAC-SHA512.
#[derive(Clone, Debug)]
pub struct Signer {
    secret: HashSecret,
}

impl Signer {
    pub fn new(secret: HashSecret) -> Self {
        Self { secret }
    }

    /// Lowercase hex HMAC over the canonical encoding of `params`.
    pub fn sign(&self, params: &GatewayParams) -> String {
        self.sign_payload(params.canonical().as_bytes())
    }

    pub fn verify(&self, params: &GatewayParams, signature_hex: &str) -> bool {
        let computed = self.sign(params);
        secure_eq(computed.as_bytes(), signature_hex.trim().as_bytes())
    }

    fn sign_payload(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GatewayParams {
        GatewayParams::from_pairs([
            ("vnp_Amount", "29900000"),
            ("vnp_OrderInfo", "Premium plan"),
            ("vnp_TxnRef", "PAY20261019101010123000042"),
            ("vnp_BankCode", ""),
        ])
        .expect("unique keys")
    }

    fn signer() -> Signer {
        Signer::new(HashSecret::new("test-secret"))
    }

    #[test]
    fn secure_eq_behaves_correctly() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }

    #[test]
    fn signature_is_128_lowercase_hex_chars() {
        let signature = signer().sign(&params());
        assert_eq!(signature.len(), 128);
        assert!(signature
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn signed_params_verify() {
        let signer = signer();
        let params = params();
        let signature = signer.sign(&params);
        assert!(signer.verify(&params, &signature));
    }

    #[test]
    fn altering_any_signature_character_fails() {
        let signer = signer();
        let params = params();
        let signature = signer.sign(&params);

        for index in 0..signature.len() {
            let mut altered: Vec<char> = signature.chars().collect();
            altered[index] = if altered[index] == '0' { '1' } else { '0' };
            let altered: String = altered.into_iter().collect();
            assert!(!signer.verify(&params, &altered), "index {} accepted", index);
        }
    }

    #[test]
    fn altering_any_value_fails() {
        let signer = signer();
        let original = params();
        let signature = signer.sign(&original);

        for (key, value) in original.iter() {
            let mut tampered = GatewayParams::new();
            for (k, v) in original.iter() {
                let v = if k == key { format!("{}x", value) } else { v.to_string() };
                tampered.insert(k, v).expect("unique keys");
            }
            assert!(!signer.verify(&tampered, &signature), "{} tamper accepted", key);
        }
    }

    #[test]
    fn signature_depends_on_secret() {
        let params = params();
        let signature = signer().sign(&params);
        let other = Signer::new(HashSecret::new("another-secret"));
        assert!(!other.verify(&params, &signature));
    }

    #[test]
    fn secret_is_redacted_in_debug_output() {
        let rendered = format!("{:?}", signer());
        assert!(!rendered.contains("test-secret"));
    }
}
