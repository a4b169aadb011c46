// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! End-to-end verification of a single skill request.
//!
//! A request moves through the stages in [`Stage`] in order and stops at the
//! first failure:
//!
//! 1. Both the signature and the certificate chain URL must be present.
//! 2. The leaf certificate is taken from the cache if it is still within its
//!    validity period. Otherwise the URL is validated, the chain fetched and
//!    validated, and the leaf cached under the raw URL.
//! 3. The body signature is verified with the leaf's public key.
//! 4. The body timestamp is checked for freshness.

use std::sync::Arc;

use x509_util::UnixTimestamp;

use crate::{
    cache::{CachedCertificate, CertificateCache},
    chain::ChainValidator,
    config::VerifierConfig,
    error::{CertError, SetupError, VerificationError},
    fetcher::{CertificateFetcher, ChainSource, Delay, HttpChainSource, TokioDelay},
    signature,
    timestamp::TimestampGuard,
    url_policy::SigningCertificateChainUrl,
    util::{Clock, SystemClock},
};

/// Pipeline stage in which a verification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    UrlValidating,
    Fetching,
    ChainValidating,
    SignatureChecking,
    TimestampChecking,
}

/// Inputs extracted from a skill request by the host.
#[derive(Debug, Clone, Copy)]
pub struct VerificationRequest<'a> {
    /// Raw request body, exactly as received.
    pub message_body: &'a [u8],
    pub cert_chain_url: Option<&'a str>,
    pub signature_base64: Option<&'a str>,
    /// Value of `request.timestamp` in the body.
    pub body_timestamp: &'a str,
}

#[derive(Debug)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub reason: Option<VerificationError>,
}

impl VerificationOutcome {
    pub fn passed() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn failed(reason: VerificationError) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }

    /// Human-readable failure reason, if any.
    pub fn reason_string(&self) -> Option<String> {
        self.reason.as_ref().map(ToString::to_string)
    }
}

impl From<Result<(), VerificationError>> for VerificationOutcome {
    fn from(result: Result<(), VerificationError>) -> Self {
        match result {
            Ok(()) => Self::passed(),
            Err(reason) => Self::failed(reason),
        }
    }
}

pub struct SkillRequestVerifier<S = HttpChainSource, D = TokioDelay, C = SystemClock> {
    fetcher: CertificateFetcher<S, D>,
    validator: ChainValidator,
    cache: Arc<CertificateCache>,
    timestamps: TimestampGuard,
    clock: C,
}

impl SkillRequestVerifier {
    /// Builds the production verifier: HTTPS retrieval, the platform trust
    /// store and the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or no trusted
    /// roots are available.
    pub fn from_config(
        config: &VerifierConfig,
        cache: Arc<CertificateCache>,
    ) -> Result<Self, SetupError> {
        let source = HttpChainSource::new(config.request_timeout(), &config.user_agent)?;
        let validator = ChainValidator::with_native_roots()?;
        Ok(Self::with_parts(
            CertificateFetcher::new(source, TokioDelay, config.retry_policy()),
            validator,
            cache,
            TimestampGuard::new(config.max_timestamp_skew_secs),
            SystemClock,
        ))
    }
}

impl<S: ChainSource, D: Delay, C: Clock> SkillRequestVerifier<S, D, C> {
    pub fn with_parts(
        fetcher: CertificateFetcher<S, D>,
        validator: ChainValidator,
        cache: Arc<CertificateCache>,
        timestamps: TimestampGuard,
        clock: C,
    ) -> Self {
        Self {
            fetcher,
            validator,
            cache,
            timestamps,
            clock,
        }
    }

    pub fn cache(&self) -> &Arc<CertificateCache> {
        &self.cache
    }

    /// Verifies a request. Every failure is reported in the outcome.
    pub async fn verify(&self, request: &VerificationRequest<'_>) -> VerificationOutcome {
        let result = self.try_verify(request).await;
        match &result {
            Ok(()) => log::debug!("Skill request verified"),
            Err(reason) => log::warn!(
                kind = reason.kind();
                "Skill request failed verification at {:?}: {reason}",
                reason.stage()
            ),
        }
        result.into()
    }

    /// Like [`Self::verify`], returning the failure as an error.
    ///
    /// # Errors
    ///
    /// Returns the [`VerificationError`] from the first failing stage.
    pub async fn try_verify(&self, request: &VerificationRequest<'_>) -> Result<(), VerificationError> {
        let (Some(url), Some(signature_base64)) = (
            request.cert_chain_url.filter(|url| !url.is_empty()),
            request.signature_base64.filter(|sig| !sig.is_empty()),
        ) else {
            return Err(VerificationError::MissingCredentials);
        };

        let now = self.clock.now_millis();
        let entry = self
            .cache
            .get_or_validate(url, now, || self.fetch_and_validate(url, now))
            .await?;

        let key = signature::public_key(entry.certificate())?;
        if !signature::verify_signature(request.message_body, signature_base64, &key)? {
            return Err(VerificationError::SignatureMismatch);
        }

        self.timestamps
            .check(request.body_timestamp, self.clock.now_millis())?;
        Ok(())
    }

    async fn fetch_and_validate(
        &self,
        raw_url: &str,
        now: UnixTimestamp,
    ) -> Result<CachedCertificate, VerificationError> {
        let url = SigningCertificateChainUrl::parse(raw_url)?;
        let chain = self.fetcher.fetch(&url).await?;
        let leaf = self.validator.validate(chain, now)?;
        CachedCertificate::new(leaf).map_err(|e| CertError::Untrusted(e.into()).into())
    }
}
