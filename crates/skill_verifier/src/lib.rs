// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Verification of signed voice-assistant skill requests.
//!
//! A request is accepted when the certificate chain named by its
//! `SignatureCertChainUrl` is served from the trusted location, chains to a
//! trusted root and names `echo-api.amazon.com`; the body's RSA/SHA-256
//! signature verifies against the leaf key; and the body timestamp is fresh.
//!
//! ```no_run
//! use std::sync::Arc;
//! use skill_verifier::{CertificateCache, SkillRequestVerifier, VerificationRequest, VerifierConfig};
//!
//! # async fn run(body: &[u8], url: &str, sig: &str, ts: &str) -> Result<(), skill_verifier::SetupError> {
//! let verifier = SkillRequestVerifier::from_config(
//!     &VerifierConfig::default(),
//!     Arc::new(CertificateCache::new()),
//! )?;
//! let outcome = verifier
//!     .verify(&VerificationRequest {
//!         message_body: body,
//!         cert_chain_url: Some(url),
//!         signature_base64: Some(sig),
//!         body_timestamp: ts,
//!     })
//!     .await;
//! if !outcome.valid {
//!     eprintln!("rejected: {}", outcome.reason_string().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod chain;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod signature;
pub mod timestamp;
pub mod url_policy;
mod util;

pub use cache::{CachedCertificate, CertificateCache};
pub use chain::{ChainValidator, REQUIRED_SAN_DNS_NAME};
pub use config::VerifierConfig;
pub use error::*;
pub use fetcher::{
    CertificateFetcher, ChainSource, Delay, HttpChainSource, Interrupted, RetryPolicy, TokioDelay,
};
pub use pipeline::{SkillRequestVerifier, Stage, VerificationOutcome, VerificationRequest};
pub use timestamp::TimestampGuard;
pub use url_policy::SigningCertificateChainUrl;
pub use util::{Clock, SystemClock};
pub use x509_util::{CertPool, UnixTimestamp};
