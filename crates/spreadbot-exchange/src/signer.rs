//! Request signing for the futures web API.
//!
//! ```text
//! body      = compact JSON of the payload ("{}" for GET)
//! digest_a  = md5_hex(token + ts_ms)[7..]
//! signature = md5_hex(ts_ms + body + digest_a)
//! ```

use md5::{Digest, Md5};
use spreadbot_core::AuthToken;

/// Header carrying the request timestamp.
pub const NONCE_HEADER: &str = "x-mxc-nonce";
/// Header carrying the signature.
pub const SIGN_HEADER: &str = "x-mxc-sign";

/// Body signed for requests without a payload.
pub const EMPTY_BODY: &str = "{}";

/// Source of request timestamps, enabling deterministic tests.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// Headers produced for one signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub nonce: String,
    pub sign: String,
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Compute the signature of `body` at `ts_ms`.
pub fn sign(token: &AuthToken, ts_ms: i64, body: &str) -> Signature {
    let first = md5_hex(&format!("{}{ts_ms}", token.expose()));
    let digest_a = &first[7..];
    let sign = md5_hex(&format!("{ts_ms}{body}{digest_a}"));
    Signature {
        nonce: ts_ms.to_string(),
        sign,
    }
}

/// Signs request bodies for one account.
pub struct RequestSigner<C: Clock> {
    token: AuthToken,
    clock: C,
}

impl<C: Clock> RequestSigner<C> {
    pub fn new(token: AuthToken, clock: C) -> Self {
        Self { token, clock }
    }

    pub fn token(&self) -> &AuthToken {
        &self.token
    }

    /// Sign `body` with the current timestamp.
    pub fn sign(&self, body: &str) -> Signature {
        sign(&self.token, self.clock.now_ms(), body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now_ms(&self) -> i64 {
            self.0
        }
    }

    const TS: i64 = 1_700_000_000_000;

    #[test]
    fn test_sign_empty_body() {
        let sig = sign(&AuthToken::new("WEB-test-token"), TS, EMPTY_BODY);
        assert_eq!(sig.nonce, "1700000000000");
        assert_eq!(sig.sign, "311fa167f2acf01fdcc816f737dd8c80");
    }

    #[test]
    fn test_sign_order_body() {
        let body = r#"{"symbol":"ABC_USDT","side":1,"leverage":10,"vol":250,"openType":1,"type":1,"price":"2"}"#;
        let signer = RequestSigner::new(AuthToken::new("WEB-test-token"), FixedClock(TS));
        let sig = signer.sign(body);
        assert_eq!(sig.sign, "e86fccab9df11887e45569541785994b");
    }

    #[test]
    fn test_signature_depends_on_body() {
        let token = AuthToken::new("WEB-test-token");
        assert_ne!(sign(&token, TS, "{}").sign, sign(&token, TS, r#"{"a":1}"#).sign);
        assert_ne!(sign(&token, TS, "{}").sign, sign(&token, TS + 1, "{}").sign);
    }
}
