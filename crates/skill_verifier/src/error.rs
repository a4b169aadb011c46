// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use thiserror::Error;
use x509_util::ValidationError;

use crate::pipeline::Stage;

/// A signing certificate chain URL that violates the URL policy.
#[derive(Error, Debug)]
pub enum UrlError {
    #[error("signing certificate chain URL [{url}] is malformed: {source}")]
    Malformed {
        url: String,
        source: url::ParseError,
    },

    #[error("signing certificate chain URL [{url}] does not contain the required hostname of [{expected}]")]
    Hostname { url: String, expected: &'static str },

    #[error("signing certificate chain URL path [{url}] is invalid, expecting path to start with [{expected}]")]
    PathPrefix { url: String, expected: &'static str },

    #[error("signing certificate chain URL [{url}] contains an unsupported protocol [{protocol}]")]
    Protocol { url: String, protocol: String },

    #[error("signing certificate chain URL [{url}] contains an invalid port [{port}]")]
    Port { url: String, port: u16 },
}

/// A failed attempt to retrieve the certificate chain body.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("{0}")]
    Io(String),
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unable to retrieve certificate chain from [{url}] after {attempts} attempts: {last}")]
    Network {
        url: String,
        attempts: u32,
        #[source]
        last: SourceError,
    },

    #[error("interrupted while waiting to retry certificate chain retrieval")]
    Interrupted,

    #[error("malformed certificate chain at [{url}]: {reason}")]
    MalformedCertificate { url: String, reason: String },
}

/// Reasons a presented chain is not trusted.
#[derive(Error, Debug)]
pub enum TrustError {
    #[error(transparent)]
    Chain(#[from] ValidationError),

    #[error(transparent)]
    Der(#[from] der::Error),

    #[error("leaf public key is not an RSA key")]
    NotRsa,

    #[error("leaf key usage does not permit key encipherment")]
    KeyUsage,

    #[error("leaf extended key usage does not include server authentication")]
    ExtendedKeyUsage,
}

#[derive(Error, Debug)]
pub enum CertError {
    #[error("signing certificate has expired: {0}")]
    Expired(ValidationError),

    #[error("signing certificate is not yet valid: {0}")]
    NotYetValid(ValidationError),

    #[error("signing certificate chain is not trusted: {0}")]
    Untrusted(#[from] TrustError),

    #[error("signing certificate does not list [{0}] as a DNS subject alternative name")]
    DomainMismatch(&'static str),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("request signature is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("signing certificate public key is unusable: {0}")]
    PublicKey(String),

    #[error("malformed request signature: {0}")]
    SignatureEncoding(String),
}

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("malformed request timestamp [{value}]: {source}")]
    Malformed {
        value: String,
        source: chrono::ParseError,
    },

    #[error("request is {skew_secs} seconds out of sync, more than the allowed {tolerance_secs}")]
    SkewExceeded { skew_secs: i64, tolerance_secs: i64 },
}

/// The reason a skill request failed verification.
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("missing signature/certificate for the provided skill request")]
    MissingCredentials,

    #[error(transparent)]
    InvalidUrl(#[from] UrlError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cert(#[from] CertError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("failed to verify the signature for the provided skill request")]
    SignatureMismatch,

    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

impl VerificationError {
    /// Short, stable identifier for the failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missingCredentials",
            Self::InvalidUrl(_) => "invalidUrl",
            Self::Fetch(FetchError::Network { .. }) => "network",
            Self::Fetch(FetchError::Interrupted) => "interrupted",
            Self::Fetch(FetchError::MalformedCertificate { .. }) => "malformedCertificate",
            Self::Cert(CertError::Expired(_)) => "expired",
            Self::Cert(CertError::NotYetValid(_)) => "notYetValid",
            Self::Cert(CertError::Untrusted(_)) => "untrusted",
            Self::Cert(CertError::DomainMismatch(_)) => "domainMismatch",
            Self::Crypto(_) => "crypto",
            Self::SignatureMismatch => "signatureMismatch",
            Self::Timestamp(TimestampError::Malformed { .. }) => "malformedTimestamp",
            Self::Timestamp(TimestampError::SkewExceeded { .. }) => "skewExceeded",
        }
    }

    /// The pipeline stage that produced this failure.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::MissingCredentials => Stage::Start,
            Self::InvalidUrl(_) => Stage::UrlValidating,
            Self::Fetch(_) => Stage::Fetching,
            Self::Cert(_) => Stage::ChainValidating,
            Self::Crypto(_) | Self::SignatureMismatch => Stage::SignatureChecking,
            Self::Timestamp(_) => Stage::TimestampChecking,
        }
    }

    /// Only transient network failures are worth retrying; everything else
    /// is a property of the request itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Network { .. }))
    }
}

/// Errors raised while constructing a verifier, never per request.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("no usable trust store: {0}")]
    TrustStore(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}
