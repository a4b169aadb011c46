// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Trust evaluation of a downloaded signing certificate chain.

use const_oid::db::{rfc5280::ID_KP_SERVER_AUTH, rfc5912::RSA_ENCRYPTION};
use x509_cert::{
    ext::pkix::{ExtendedKeyUsage, KeyUsage},
    Certificate,
};
use x509_util::{CertPool, UnixTimestamp, ValidationError};

use crate::error::{CertError, SetupError, TrustError};

/// The DNS name the signing certificate must carry, compared exactly.
pub const REQUIRED_SAN_DNS_NAME: &str = "echo-api.amazon.com";

/// Validates chains against a fixed set of trusted roots.
pub struct ChainValidator {
    roots: CertPool,
}

impl ChainValidator {
    /// # Errors
    ///
    /// Returns [`SetupError::TrustStore`] if `roots` is empty.
    pub fn new(roots: CertPool) -> Result<Self, SetupError> {
        if roots.is_empty() {
            return Err(SetupError::TrustStore("no trusted roots".to_owned()));
        }
        Ok(Self { roots })
    }

    /// Loads the platform's trusted roots. Certificates that cannot be
    /// parsed or indexed are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::TrustStore`] if no usable root was found.
    pub fn with_native_roots() -> Result<Self, SetupError> {
        let result = rustls_native_certs::load_native_certs();
        for err in &result.errors {
            log::warn!("Error loading native root certificates: {err}");
        }
        Self::new(load_roots(result.certs.iter().map(|cert| &cert[..])))
    }

    pub fn roots(&self) -> &CertPool {
        &self.roots
    }

    /// Checks, in order, that the leaf is inside its validity window, that
    /// the chain leads to a trusted root with a leaf usable for an RSA server
    /// key exchange, and that the leaf names [`REQUIRED_SAN_DNS_NAME`].
    /// Returns the leaf.
    ///
    /// # Errors
    ///
    /// Returns the [`CertError`] of the first failing check.
    pub fn validate(
        &self,
        mut chain: Vec<Certificate>,
        now: UnixTimestamp,
    ) -> Result<Certificate, CertError> {
        let leaf = chain
            .first()
            .ok_or(TrustError::Chain(ValidationError::EmptyChain))?;

        x509_util::check_validity(leaf, now).map_err(|e| match e {
            ValidationError::Expired { .. } => CertError::Expired(e),
            ValidationError::NotYetValid { .. } => CertError::NotYetValid(e),
            other => CertError::Untrusted(other.into()),
        })?;

        x509_util::validate_chain(&chain, &self.roots, now).map_err(TrustError::from)?;
        check_rsa_key_exchange(leaf)?;

        let names = x509_util::dns_names(leaf).map_err(TrustError::from)?;
        if !names.iter().any(|name| name == REQUIRED_SAN_DNS_NAME) {
            return Err(CertError::DomainMismatch(REQUIRED_SAN_DNS_NAME));
        }

        Ok(chain.swap_remove(0))
    }
}

/// Builds a pool from DER-encoded roots, skipping any that fail to parse or
/// whose extensions cannot be indexed.
fn load_roots<'a>(ders: impl IntoIterator<Item = &'a [u8]>) -> CertPool {
    let mut roots = CertPool::default();
    let mut skipped = 0;
    for der in ders {
        let added = x509_util::parse_chain(der)
            .and_then(|certs| certs.into_iter().try_for_each(|cert| roots.add_cert(cert)));
        if let Err(e) = added {
            log::debug!("Skipping root certificate: {e}");
            skipped += 1;
        }
    }
    if skipped > 0 {
        log::warn!("Skipped {skipped} unusable native root certificates");
    }
    log::info!("Loaded {} trusted root certificates", roots.len());
    roots
}

/// Checks the leaf as a TLS server certificate for RSA key exchange: the key
/// must be RSA, and when present the key usage must allow key encipherment
/// and the extended key usage must include server authentication.
fn check_rsa_key_exchange(leaf: &Certificate) -> Result<(), TrustError> {
    let tbs = &leaf.tbs_certificate;
    if tbs.subject_public_key_info.algorithm.oid != RSA_ENCRYPTION {
        return Err(TrustError::NotRsa);
    }
    if tbs
        .get::<KeyUsage>()?
        .is_some_and(|(_, ku)| !ku.key_encipherment())
    {
        return Err(TrustError::KeyUsage);
    }
    if tbs
        .get::<ExtendedKeyUsage>()?
        .is_some_and(|(_, eku)| !eku.0.iter().any(|oid| *oid == ID_KP_SERVER_AUTH))
    {
        return Err(TrustError::ExtendedKeyUsage);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const ROOT: &[u8] = include_bytes!("../tests/root.pem");
    const CHAIN: &[u8] = include_bytes!("../tests/chain.pem");
    const ROGUE_CHAIN: &[u8] = include_bytes!("../tests/rogue-chain.pem");
    const WRONG_SAN_CHAIN: &[u8] = include_bytes!("../tests/wrong-san-chain.pem");
    const EC_CHAIN: &[u8] = include_bytes!("../tests/ec-chain.pem");
    const STRICT_ROOT: &[u8] = include_bytes!("../tests/pkix-root.pem");
    const STRICT_CHAIN: &[u8] = include_bytes!("../tests/pkix-chain.pem");
    const MD5_CHAIN: &[u8] = include_bytes!("../tests/md5-chain.pem");
    const CRITICAL_EXT_CHAIN: &[u8] = include_bytes!("../tests/critical-ext-chain.pem");
    const NO_CERT_SIGN_CHAIN: &[u8] = include_bytes!("../tests/no-cert-sign-chain.pem");
    const MALFORMED_SKI_ROOT: &[u8] = include_bytes!("../tests/malformed-ski-root.pem");

    fn validator() -> ChainValidator {
        ChainValidator::new(CertPool::from_pem(ROOT).unwrap()).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> UnixTimestamp {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
            .try_into()
            .unwrap()
    }

    fn chain(pem: &[u8]) -> Vec<Certificate> {
        x509_util::parse_chain(pem).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            ChainValidator::new(CertPool::default()),
            Err(SetupError::TrustStore(_))
        ));
    }

    #[test]
    fn test_valid_chain_returns_leaf() {
        let expected = chain(CHAIN).remove(0);
        let leaf = validator().validate(chain(CHAIN), at(2024, 1, 1)).unwrap();
        assert_eq!(leaf, expected);
    }

    #[test]
    fn test_leaf_validity_window() {
        assert!(matches!(
            validator().validate(chain(CHAIN), at(2030, 6, 1)),
            Err(CertError::Expired(ValidationError::Expired { .. }))
        ));
        assert!(matches!(
            validator().validate(chain(CHAIN), at(2021, 6, 1)),
            Err(CertError::NotYetValid(ValidationError::NotYetValid { .. }))
        ));
    }

    #[test]
    fn test_untrusted_chains() {
        // Leaf signed by a self-signed impostor that reuses the intermediate's name.
        assert!(matches!(
            validator().validate(chain(ROGUE_CHAIN), at(2024, 1, 1)),
            Err(CertError::Untrusted(TrustError::Chain(_)))
        ));

        // Leaf alone, without its intermediate.
        let mut leaf_only = chain(CHAIN);
        leaf_only.truncate(1);
        assert!(matches!(
            validator().validate(leaf_only, at(2024, 1, 1)),
            Err(CertError::Untrusted(TrustError::Chain(
                ValidationError::NoPathToTrustedRoot { .. }
            )))
        ));

        assert!(matches!(
            validator().validate(Vec::new(), at(2024, 1, 1)),
            Err(CertError::Untrusted(TrustError::Chain(
                ValidationError::EmptyChain
            )))
        ));
    }

    #[test]
    fn test_non_rsa_leaf_rejected() {
        assert!(matches!(
            validator().validate(chain(EC_CHAIN), at(2024, 1, 1)),
            Err(CertError::Untrusted(TrustError::NotRsa))
        ));
    }

    #[test]
    fn test_san_must_match_exactly() {
        // Only near misses are listed: a suffix, an uppercase variant, and
        // non-DNS names holding the exact string.
        assert!(matches!(
            validator().validate(chain(WRONG_SAN_CHAIN), at(2024, 1, 1)),
            Err(CertError::DomainMismatch(REQUIRED_SAN_DNS_NAME))
        ));
    }

    #[test]
    fn test_key_usage_checks() {
        let chain = chain(CHAIN);
        check_rsa_key_exchange(&chain[0]).unwrap();
        // The intermediate is an RSA CA limited to certificate and CRL signing.
        assert!(matches!(
            check_rsa_key_exchange(&chain[1]),
            Err(TrustError::KeyUsage)
        ));
    }

    #[test]
    fn test_weak_links_rejected() {
        let validator = ChainValidator::new(CertPool::from_pem(STRICT_ROOT).unwrap()).unwrap();
        validator
            .validate(chain(STRICT_CHAIN), at(2024, 1, 1))
            .unwrap();

        assert!(matches!(
            validator.validate(chain(MD5_CHAIN), at(2024, 1, 1)),
            Err(CertError::Untrusted(TrustError::Chain(
                ValidationError::UnsupportedSigAlg(_)
            )))
        ));
        assert!(matches!(
            validator.validate(chain(CRITICAL_EXT_CHAIN), at(2024, 1, 1)),
            Err(CertError::Untrusted(TrustError::Chain(
                ValidationError::UnhandledCriticalExtension(_)
            )))
        ));
        assert!(matches!(
            validator.validate(chain(NO_CERT_SIGN_CHAIN), at(2024, 1, 1)),
            Err(CertError::Untrusted(TrustError::Chain(
                ValidationError::InvalidKeyUsage
            )))
        ));
    }

    fn first_der(pem: &[u8]) -> Vec<u8> {
        use der::Encode;
        chain(pem)[0].to_der().unwrap()
    }

    #[test]
    fn test_unusable_roots_are_skipped() {
        let bad = first_der(MALFORMED_SKI_ROOT);
        let good = first_der(ROOT);
        let garbage = b"not a certificate".to_vec();

        let roots = load_roots([bad.as_slice(), garbage.as_slice(), good.as_slice()]);
        assert_eq!(roots.len(), 1);
        let validator = ChainValidator::new(roots).unwrap();
        validator.validate(chain(CHAIN), at(2024, 1, 1)).unwrap();

        assert!(matches!(
            ChainValidator::new(load_roots([bad.as_slice(), garbage.as_slice()])),
            Err(SetupError::TrustStore(_))
        ));
    }
}
