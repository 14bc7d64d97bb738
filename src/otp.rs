use std::time::{SystemTime, UNIX_EPOCH};

use totp_rs::{Algorithm, Secret, TOTP};
use tracing::warn;

pub const STEP_SECONDS: u64 = 30;
pub const DIGITS: usize = 6;

/// Steps accepted before and after the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerance {
    pub before: u8,
    pub after: u8,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { before: 1, after: 1 }
    }
}

/// Decode a base-32 shared secret. Padding, spaces and case are ignored.
pub fn decode_secret(encoded: &str) -> Option<Vec<u8>> {
    let normalized: String = encoded
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return None;
    }
    Secret::Encoded(normalized).to_bytes().ok().filter(|b| !b.is_empty())
}

fn totp_for(secret: &[u8]) -> TOTP {
    TOTP::new_unchecked(Algorithm::SHA1, DIGITS, 0, STEP_SECONDS, secret.to_vec())
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Canonical six-digit form of a candidate, or `None` when it is not a
/// non-negative integer that fits.
fn normalize_code(candidate: &str) -> Option<String> {
    let code: u32 = candidate.trim().parse().ok()?;
    if code >= 10u32.pow(DIGITS as u32) {
        return None;
    }
    Some(format!("{code:0width$}", width = DIGITS))
}

/// Check `candidate` at `unix_time` and the tolerated neighbouring steps.
pub fn verify_at(candidate: &str, secret: &[u8], tolerance: Tolerance, unix_time: u64) -> bool {
    let Some(code) = normalize_code(candidate) else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }
    let totp = totp_for(secret);
    let before = -i64::from(tolerance.before);
    let after = i64::from(tolerance.after);
    (before..=after).any(|offset| {
        let t = unix_time as i64 + offset * STEP_SECONDS as i64;
        t >= 0 && totp.check(&code, t as u64)
    })
}

pub fn verify(candidate: &str, secret: &[u8], tolerance: Tolerance) -> bool {
    verify_at(candidate, secret, tolerance, unix_now())
}

/// Code for `secret` at `unix_time`; used by clients and tests.
pub fn generate_at(secret: &[u8], unix_time: u64) -> String {
    totp_for(secret).generate(unix_time)
}

/// Machine-client verifier holding the decoded shared secret. Without a
/// usable secret every code is rejected.
#[derive(Clone, Default)]
pub struct OtpVerifier {
    secret: Option<Vec<u8>>,
    tolerance: Tolerance,
}

impl OtpVerifier {
    pub fn from_base32(encoded: Option<&str>) -> Self {
        let secret = match encoded {
            Some(e) if !e.trim().is_empty() => {
                let decoded = decode_secret(e);
                if decoded.is_none() {
                    warn!("shared OTP secret is not valid base-32; machine access disabled");
                }
                decoded
            }
            _ => {
                warn!("no shared OTP secret resolved; machine access disabled");
                None
            }
        };
        Self { secret, tolerance: Tolerance::default() }
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn is_available(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify(&self, candidate: &str) -> bool {
        self.verify_at(candidate, unix_now())
    }

    pub fn verify_at(&self, candidate: &str, unix_time: u64) -> bool {
        match &self.secret {
            Some(s) => verify_at(candidate, s, self.tolerance, unix_time),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "12345678901234567890", the RFC 6238 SHA-1 test key
    const B32: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    const T: u64 = 1_111_111_109;

    fn key() -> Vec<u8> {
        decode_secret(B32).unwrap()
    }

    #[test]
    fn decodes_rfc_key() {
        assert_eq!(key(), b"12345678901234567890".to_vec());
        assert_eq!(decode_secret("gezd gnbv gy3t qojq gezd gnbv gy3t qojq===="), Some(key()));
    }

    #[test]
    fn rfc6238_vector_six_digits() {
        // 8-digit reference is 07081804
        assert_eq!(generate_at(&key(), T), "081804");
    }

    #[test]
    fn current_and_adjacent_steps_accepted() {
        let k = key();
        let tol = Tolerance::default();
        assert!(verify_at(&generate_at(&k, T), &k, tol, T));
        assert!(verify_at(&generate_at(&k, T - STEP_SECONDS), &k, tol, T));
        assert!(verify_at(&generate_at(&k, T + STEP_SECONDS), &k, tol, T));
    }

    #[test]
    fn two_steps_away_rejected() {
        let k = key();
        let tol = Tolerance::default();
        let old = generate_at(&k, T - 2 * STEP_SECONDS);
        let future = generate_at(&k, T + 2 * STEP_SECONDS);
        let near: Vec<String> =
            (-1i64..=1).map(|o| generate_at(&k, (T as i64 + o * 30) as u64)).collect();
        if !near.contains(&old) {
            assert!(!verify_at(&old, &k, tol, T));
        }
        if !near.contains(&future) {
            assert!(!verify_at(&future, &k, tol, T));
        }
    }

    #[test]
    fn non_numeric_rejected() {
        let k = key();
        for bad in ["", "abc", "12a456", "-81804", "1234567", "08 1804"] {
            assert!(!verify_at(bad, &k, Tolerance::default(), T), "{bad:?}");
        }
    }

    #[test]
    fn surrounding_whitespace_tolerated() {
        let k = key();
        let code = generate_at(&k, T);
        assert!(verify_at(&format!(" {code} "), &k, Tolerance::default(), T));
    }

    #[test]
    fn missing_or_bad_secret_fails_closed() {
        assert!(!OtpVerifier::from_base32(None).verify_at("081804", T));
        assert!(!OtpVerifier::from_base32(Some("   ")).verify_at("081804", T));
        assert!(!OtpVerifier::from_base32(Some("!!!not base32!!!")).verify_at("081804", T));
        assert!(OtpVerifier::from_base32(Some(B32)).verify_at("081804", T));
    }

    #[test]
    fn verifier_accepts_neighbouring_steps_at_fixed_time() {
        let v = OtpVerifier::from_base32(Some(B32));
        let now = T - T % STEP_SECONDS;
        assert!(v.verify_at(&generate_at(&key(), now - STEP_SECONDS), now));
        assert!(v.verify_at(&generate_at(&key(), now - STEP_SECONDS), now + STEP_SECONDS - 1));
        assert!(v.verify_at(&generate_at(&key(), now + STEP_SECONDS), now));
    }

    #[test]
    fn zero_tolerance_only_accepts_current_step() {
        let v = OtpVerifier::from_base32(Some(B32))
            .with_tolerance(Tolerance { before: 0, after: 0 });
        let prev = generate_at(&key(), T - STEP_SECONDS);
        if prev != generate_at(&key(), T) {
            assert!(!v.verify_at(&prev, T));
        }
    }
}
