use sha2::{Digest, Sha256};

/// Integrity signature generator for provider charges.
///
/// The provider recomputes `sha256(reference + amount_in_cents + currency + key)` and
/// rejects the charge when it does not match, so amount and currency cannot be altered
/// after signing.
#[derive(Clone)]
pub struct IntegritySigner {
    key: String,
}

impl IntegritySigner {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Hex-encoded SHA-256 of the concatenated fields.
    pub fn sign(&self, reference: &str, amount_in_cents: i64, currency: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(reference.as_bytes());
        hasher.update(amount_in_cents.to_string().as_bytes());
        hasher.update(currency.as_bytes());
        hasher.update(self.key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify(
        &self,
        signature: &str,
        reference: &str,
        amount_in_cents: i64,
        currency: &str,
    ) -> bool {
        self.sign(reference, amount_in_cents, currency)
            .eq_ignore_ascii_case(signature)
    }
}

impl std::fmt::Debug for IntegritySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegritySigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_concatenated_digest() {
        let signer = IntegritySigner::new("test_integrity_secret");
        let expected = hex::encode(Sha256::digest(
            b"TXN-TX1-1700000000000".iter()
                .chain(b"12600000")
                .chain(b"COP")
                .chain(b"test_integrity_secret")
                .copied()
                .collect::<Vec<u8>>(),
        ));
        let signature = signer.sign("TXN-TX1-1700000000000", 12_600_000, "COP");
        assert_eq!(signature, expected);
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn any_field_change_breaks_verification() {
        let signer = IntegritySigner::new("secret");
        let signature = signer.sign("REF-1", 5000, "COP");
        assert!(signer.verify(&signature, "REF-1", 5000, "COP"));
        assert!(!signer.verify(&signature, "REF-1", 5001, "COP"));
        assert!(!signer.verify(&signature, "REF-2", 5000, "COP"));
        assert!(!signer.verify(&signature, "REF-1", 5000, "USD"));
        assert!(!IntegritySigner::new("other").verify(&signature, "REF-1", 5000, "COP"));
    }

    #[test]
    fn debug_hides_key() {
        assert!(!format!("{:?}", IntegritySigner::new("top-secret")).contains("top-secret"));
    }
}
