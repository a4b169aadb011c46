// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Utilities for X.509 operations: trusted root pools, chain parsing,
//! validity windows and chain-to-root validation.

use const_oid::{
    db::{
        rfc5280::{
            ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS, ID_CE_CERTIFICATE_POLICIES,
            ID_CE_EXT_KEY_USAGE, ID_CE_KEY_USAGE, ID_CE_SUBJECT_ALT_NAME,
            ID_CE_SUBJECT_KEY_IDENTIFIER,
        },
        rfc5912::{
            ECDSA_WITH_SHA_256, ECDSA_WITH_SHA_384, ECDSA_WITH_SHA_512,
            SHA_256_WITH_RSA_ENCRYPTION, SHA_384_WITH_RSA_ENCRYPTION, SHA_512_WITH_RSA_ENCRYPTION,
        },
        rfc8410::ID_ED_25519,
    },
    ObjectIdentifier,
};
use der::{Decode, Encode, Error as DerError, Reader, SliceReader};
use sha2::{Digest, Sha256};
use std::collections::{hash_map::Entry, HashMap};
use x509_cert::{
    ext::pkix::{
        name::GeneralName, AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectAltName,
        SubjectKeyIdentifier,
    },
    Certificate,
};
use x509_verify::VerifyingKey;

/// Unix timestamp, measured since the epoch (January 1, 1970, 00:00),
/// ignoring leap seconds, in milliseconds.
/// This can be unsigned as we never deal with negative timestamps.
pub type UnixTimestamp = u64;

/// Signature algorithms accepted on links of a chain. Anything weaker than
/// SHA-256 is refused.
const SUPPORTED_SIGNATURE_ALGORITHMS: &[ObjectIdentifier] = &[
    SHA_256_WITH_RSA_ENCRYPTION,
    SHA_384_WITH_RSA_ENCRYPTION,
    SHA_512_WITH_RSA_ENCRYPTION,
    ECDSA_WITH_SHA_256,
    ECDSA_WITH_SHA_384,
    ECDSA_WITH_SHA_512,
    ID_ED_25519,
];

/// Extensions whose semantics are processed here or by callers. A critical
/// extension outside this list makes the certificate unusable.
const HANDLED_CRITICAL_EXTENSIONS: &[ObjectIdentifier] = &[
    ID_CE_BASIC_CONSTRAINTS,
    ID_CE_KEY_USAGE,
    ID_CE_EXT_KEY_USAGE,
    ID_CE_SUBJECT_ALT_NAME,
    ID_CE_SUBJECT_KEY_IDENTIFIER,
    ID_CE_AUTHORITY_KEY_IDENTIFIER,
    ID_CE_CERTIFICATE_POLICIES,
];

/// A `CertPool` is a set of certificates, typically trusted roots.
#[derive(Default)]
pub struct CertPool {
    // Map from SHA256 fingerprint to index in `certs`.
    by_fingerprint: HashMap<[u8; 32], usize>,
    // Map from subject name to list of indexes of certs with that name.
    by_name: HashMap<String, Vec<usize>>,
    // Map from SKI to list of indexes of certs with that SKI.
    by_subject_key_id: HashMap<Vec<u8>, Vec<usize>>,
    // List of certificates in pool.
    pub certs: Vec<Certificate>,
}

impl CertPool {
    /// Constructs a `CertPool` from the given certificates, weeding out
    /// duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding certificate
    /// extensions.
    pub fn new(certs: Vec<Certificate>) -> Result<Self, DerError> {
        let mut pool = Self::default();
        for cert in certs {
            pool.add_cert(cert)?;
        }
        Ok(pool)
    }

    /// Constructs a `CertPool` from PEM-encoded certificates.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data cannot be decoded.
    pub fn from_pem(input: &[u8]) -> Result<Self, DerError> {
        let mut pool = Self::default();
        pool.append_certs_from_pem(input)?;
        Ok(pool)
    }

    /// Number of distinct certificates in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Search the pool for potential issuers of the provided certificate,
    /// first by authority key identifier and then by issuer name.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding certificate extensions.
    pub fn find_potential_parents(&self, cert: &Certificate) -> Result<&[usize], DerError> {
        if let Some((_, aki)) = cert.tbs_certificate.get::<AuthorityKeyIdentifier>()? {
            if let Some(key_id) = aki.key_identifier {
                if let Some(indexes) = self.by_subject_key_id.get(key_id.as_bytes()) {
                    return Ok(indexes);
                }
            }
        }
        if let Some(indexes) = self.by_name.get(&cert.tbs_certificate.issuer.to_string()) {
            return Ok(indexes);
        }
        Ok(&[])
    }

    /// Add a certificate to the pool if it is not already included.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate or
    /// parsing its extensions.
    pub fn add_cert(&mut self, cert: Certificate) -> Result<(), DerError> {
        let fingerprint: [u8; 32] = Sha256::digest(cert.to_der()?).into();
        if let Entry::Vacant(e) = self.by_fingerprint.entry(fingerprint) {
            let idx = self.certs.len();
            e.insert(idx);
            self.by_name
                .entry(cert.tbs_certificate.subject.to_string())
                .or_default()
                .push(idx);
            if let Some((_, ski)) = cert.tbs_certificate.get::<SubjectKeyIdentifier>()? {
                self.by_subject_key_id
                    .entry(ski.0.as_bytes().to_vec())
                    .or_default()
                    .push(idx);
            }
            self.certs.push(cert);
        }

        Ok(())
    }

    /// Add certs to the pool from a byte slice assumed to contain PEM encoded
    /// data.
    ///
    /// # Errors
    ///
    /// Returns an error if there are DER encoding issues.
    pub fn append_certs_from_pem(&mut self, input: &[u8]) -> Result<(), DerError> {
        // load_pem_chain rejects empty input.
        if !input.is_empty() {
            for cert in Certificate::load_pem_chain(input)? {
                self.add_cert(cert)?;
            }
        }
        Ok(())
    }

    /// Check if the pool includes a certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if there are issues DER-encoding the certificate.
    pub fn includes(&self, cert: &Certificate) -> Result<bool, DerError> {
        Ok(self
            .by_fingerprint
            .contains_key::<[u8; 32]>(&Sha256::digest(cert.to_der()?).into()))
    }
}

/// Parses a certificate chain that is either PEM (one or more `CERTIFICATE`
/// blocks) or one or more concatenated DER certificates. The order of the
/// input is preserved, so the first certificate is the leaf.
///
/// Empty input yields an empty chain.
///
/// # Errors
///
/// Returns an error if any certificate fails to decode.
pub fn parse_chain(input: &[u8]) -> Result<Vec<Certificate>, DerError> {
    let trimmed = input.trim_ascii_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with(b"-----BEGIN") {
        return Certificate::load_pem_chain(trimmed);
    }

    let mut reader = SliceReader::new(trimmed)?;
    let mut chain = Vec::new();
    while !reader.is_finished() {
        chain.push(Certificate::decode(&mut reader)?);
    }
    Ok(chain)
}

/// Returns the start of the certificate's validity window.
///
/// # Errors
///
/// Returns an error if the timestamp does not fit in a [`UnixTimestamp`].
pub fn not_before(cert: &Certificate) -> Result<UnixTimestamp, ValidationError> {
    u64::try_from(
        cert.tbs_certificate
            .validity
            .not_before
            .to_unix_duration()
            .as_millis(),
    )
    .map_err(|_| ValidationError::InvalidValidity)
}

/// Returns the end of the certificate's validity window.
///
/// # Errors
///
/// Returns an error if the timestamp does not fit in a [`UnixTimestamp`].
pub fn not_after(cert: &Certificate) -> Result<UnixTimestamp, ValidationError> {
    u64::try_from(
        cert.tbs_certificate
            .validity
            .not_after
            .to_unix_duration()
            .as_millis(),
    )
    .map_err(|_| ValidationError::InvalidValidity)
}

/// Checks that `now` falls within `[notBefore, notAfter]` for the certificate.
///
/// # Errors
///
/// Returns [`ValidationError::NotYetValid`] or [`ValidationError::Expired`]
/// when `now` is outside the validity window.
pub fn check_validity(cert: &Certificate, now: UnixTimestamp) -> Result<(), ValidationError> {
    let not_before = not_before(cert)?;
    if now < not_before {
        return Err(ValidationError::NotYetValid {
            subject: cert.tbs_certificate.subject.to_string(),
            not_before,
        });
    }
    let not_after = not_after(cert)?;
    if now > not_after {
        return Err(ValidationError::Expired {
            subject: cert.tbs_certificate.subject.to_string(),
            not_after,
        });
    }
    Ok(())
}

/// Returns the DNS names listed in the certificate's Subject Alternative Name
/// extension, in order. Other name forms are skipped.
///
/// # Errors
///
/// Returns an error if the extension is present but cannot be decoded.
pub fn dns_names(cert: &Certificate) -> Result<Vec<String>, DerError> {
    let Some((_, san)) = cert.tbs_certificate.get::<SubjectAltName>()? else {
        return Ok(Vec::new());
    };
    Ok(san
        .0
        .into_iter()
        .filter_map(|name| match name {
            GeneralName::DnsName(ia5_string) => Some(ia5_string.to_string()),
            _ => None,
        })
        .collect())
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Der(#[from] der::Error),
    #[error("empty chain")]
    EmptyChain,
    #[error("certificate validity is out of range")]
    InvalidValidity,
    #[error("certificate '{subject}' expired at {not_after}")]
    Expired {
        subject: String,
        not_after: UnixTimestamp,
    },
    #[error("certificate '{subject}' is not valid before {not_before}")]
    NotYetValid {
        subject: String,
        not_before: UnixTimestamp,
    },
    #[error("invalid link in chain")]
    InvalidLinkInChain,
    #[error("missing or invalid basic constraints")]
    InvalidBasicConstraints,
    #[error("issuer not in root store: {to_verify_issuer}")]
    NoPathToTrustedRoot { to_verify_issuer: String },
    #[error("mismatching signature algorithm identifier")]
    MismatchingSigAlg,
    #[error("unsupported signature algorithm {0}")]
    UnsupportedSigAlg(ObjectIdentifier),
    #[error("unhandled critical extension {0}")]
    UnhandledCriticalExtension(ObjectIdentifier),
    #[error("CA key usage does not allow certificate signing")]
    InvalidKeyUsage,
}

/// Validates that a certificate chain, starting from the leaf, leads back to
/// one of the trusted `roots` at time `now`.
///
/// 1. Each certificate in the chain signs the previous certificate.
/// 2. Each certificate in the chain is well-formed, meaning the signature
///    algorithm used to sign it matches the signature algorithm field in the
///    `TBSCertificate` and is SHA-256 or stronger, and it carries no critical
///    extension other than the standard PKIX ones handled here.
/// 3. Every intermediate certificate has a `BasicConstraints` extension with
///    `ca = true`, path length constraints are met, and `now` is within its
///    validity window. Intermediates and the issuing root must allow
///    `keyCertSign` if they carry a `KeyUsage` extension.
/// 4. A cert in the chain is a trusted root or is signed by one. Validation
///    stops as soon as such a cert is found, and any certificates presented
///    after it are ignored. This accepts cross-signed chains whose final
///    cert is not itself trusted.
///
/// The leaf's own validity window is not checked here; callers apply their
/// own policy to the leaf.
///
/// # Errors
///
/// Returns a `ValidationError` if the chain fails to validate.
pub fn validate_chain(
    chain: &[Certificate],
    roots: &CertPool,
    now: UnixTimestamp,
) -> Result<(), ValidationError> {
    let (leaf, intermediates) = chain.split_first().ok_or(ValidationError::EmptyChain)?;

    check_well_formedness(leaf)?;

    // The current certificate to be verified.
    let mut current_cert = leaf;

    for (i, intermediate) in intermediates.iter().enumerate() {
        if has_path_to_root(current_cert, roots, i)? {
            return Ok(());
        }

        check_well_formedness(intermediate)?;
        check_validity(intermediate, now)?;

        // Check basic constraints for the intermediate, passing in the number
        // of preceding intermediates in the chain (excluding the leaf).
        check_ca_basic_constraints(intermediate, i)?;
        check_ca_key_usage(intermediate)?;

        if !is_link_valid(current_cert, intermediate) {
            return Err(ValidationError::InvalidLinkInChain);
        }

        current_cert = intermediate;
    }

    if has_path_to_root(current_cert, roots, intermediates.len())? {
        Ok(())
    } else {
        Err(ValidationError::NoPathToTrustedRoot {
            to_verify_issuer: current_cert.tbs_certificate.issuer.to_string(),
        })
    }
}

/// Check for a path from the provided certificate to a trusted root. This can
/// be the case if the cert itself is a trusted root, or if the certificate is
/// signed by a trusted root.
///
/// # Arguments
///
/// * `cert` - The cert for which to find a path to a trusted root.
/// * `roots` - The cert pool of trusted roots.
/// * `num_intermediates` - The number of intermediate certs preceding the cert
///   in the chain. This is used for checking the path length basic constraint.
fn has_path_to_root(
    cert: &Certificate,
    roots: &CertPool,
    num_intermediates: usize,
) -> Result<bool, ValidationError> {
    if roots.includes(cert)? {
        return Ok(true);
    }

    Ok(roots
        .find_potential_parents(cert)?
        .iter()
        .any(|&root_idx| {
            let root = &roots.certs[root_idx];
            is_link_valid(cert, root)
                && check_ca_basic_constraints(root, num_intermediates).is_ok()
                && check_ca_key_usage(root).is_ok()
        }))
}

/// Verify that a cert is well-formed according to RFC 5280.
fn check_well_formedness(cert: &Certificate) -> Result<(), ValidationError> {
    if cert.signature_algorithm != cert.tbs_certificate.signature {
        return Err(ValidationError::MismatchingSigAlg);
    }
    let alg = cert.signature_algorithm.oid;
    if !SUPPORTED_SIGNATURE_ALGORITHMS.contains(&alg) {
        return Err(ValidationError::UnsupportedSigAlg(alg));
    }
    if let Some(ext) = cert
        .tbs_certificate
        .extensions
        .iter()
        .flatten()
        .find(|ext| ext.critical && !HANDLED_CRITICAL_EXTENSIONS.contains(&ext.extn_id))
    {
        return Err(ValidationError::UnhandledCriticalExtension(ext.extn_id));
    }
    Ok(())
}

/// Returns whether `issuer`'s key verifies the signature on `child`.
///
/// Paths are proposed by comparing the child's issuer with the candidate's
/// subject (as strings) or by key identifier; the signature check is what
/// actually binds the link.
fn is_link_valid(child: &Certificate, issuer: &Certificate) -> bool {
    if let Ok(key) = VerifyingKey::try_from(issuer) {
        key.verify_strict(child).is_ok()
    } else {
        false
    }
}

/// A CA certificate that restricts its key usage must allow signing
/// certificates.
fn check_ca_key_usage(ca_cert: &Certificate) -> Result<(), ValidationError> {
    if ca_cert
        .tbs_certificate
        .get::<KeyUsage>()?
        .is_some_and(|(_, ku)| !ku.key_cert_sign())
    {
        return Err(ValidationError::InvalidKeyUsage);
    }
    Ok(())
}

/// Validate Basic Constraints for a CA certificate.
///
/// # Arguments
///
/// * `ca_cert` - The CA certificate to check.
/// * `num_intermediates` - The number of intermediate certs preceding the cert
///   in the chain. This is used for checking the path length basic constraint.
fn check_ca_basic_constraints(
    ca_cert: &Certificate,
    num_intermediates: usize,
) -> Result<(), ValidationError> {
    if ca_cert
        .tbs_certificate
        .get::<BasicConstraints>()?
        .is_none_or(|(_, bc)| {
            // The path length constraint gives the maximum number of
            // intermediate certificates that can follow this certificate in
            // a valid certification path, not counting the end-entity.
            if bc
                .path_len_constraint
                .is_some_and(|max| num_intermediates > (max as usize))
            {
                return true;
            }
            !bc.ca
        })
    {
        return Err(ValidationError::InvalidBasicConstraints);
    }
    Ok(())
}
