// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! RSA PKCS#1 v1.5 / SHA-256 verification of request bodies.

use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use der::Encode;
use ::signature::Verifier;
use rsa::{
    pkcs1v15::{Signature, VerifyingKey},
    pkcs8::DecodePublicKey,
    traits::PublicKeyParts,
    RsaPublicKey,
};
use sha2::Sha256;
use x509_cert::Certificate;

use crate::error::CryptoError;

/// Standard alphabet; trailing padding is optional.
const SIGNATURE_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Extracts the RSA public key from a certificate.
///
/// # Errors
///
/// Returns [`CryptoError::PublicKey`] if the key is not an RSA key or cannot
/// be decoded.
pub fn public_key(cert: &Certificate) -> Result<RsaPublicKey, CryptoError> {
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| CryptoError::PublicKey(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&spki).map_err(|e| CryptoError::PublicKey(e.to_string()))
}

/// Verifies a base64 signature over the exact bytes of `body`.
///
/// Returns `Ok(false)` for a well-formed signature that does not match.
///
/// # Errors
///
/// Returns an error if the signature is not valid base64 or its length does
/// not match the key's modulus.
pub fn verify_signature(
    body: &[u8],
    signature_base64: &str,
    key: &RsaPublicKey,
) -> Result<bool, CryptoError> {
    let raw = SIGNATURE_ENGINE.decode(signature_base64)?;
    if raw.len() != key.size() {
        return Err(CryptoError::SignatureEncoding(format!(
            "signature is {} bytes, expected {}",
            raw.len(),
            key.size()
        )));
    }
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|e| CryptoError::SignatureEncoding(e.to_string()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(key.clone());
    Ok(verifying_key.verify(body, &signature).is_ok())
}
