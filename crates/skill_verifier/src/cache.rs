// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Cache of validated signing certificates, keyed by the raw certificate
//! chain URL.
//!
//! Entries are never evicted. A lookup only returns an entry whose `notAfter`
//! is still in the future, and a successful revalidation overwrites the
//! previous entry. Concurrent misses for the same URL may each run the
//! validation; the last writer wins.

use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::RwLock;
use x509_cert::Certificate;
use x509_util::{UnixTimestamp, ValidationError};

#[derive(Clone, Debug)]
pub struct CachedCertificate {
    certificate: Arc<Certificate>,
    not_after: UnixTimestamp,
}

impl CachedCertificate {
    /// # Errors
    ///
    /// Returns an error if the certificate's `notAfter` cannot be represented.
    pub fn new(certificate: Certificate) -> Result<Self, ValidationError> {
        let not_after = x509_util::not_after(&certificate)?;
        Ok(Self {
            certificate: Arc::new(certificate),
            not_after,
        })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn not_after(&self) -> UnixTimestamp {
        self.not_after
    }

    fn is_fresh(&self, now: UnixTimestamp) -> bool {
        self.not_after > now
    }
}

#[derive(Default)]
pub struct CertificateCache {
    entries: RwLock<HashMap<String, CachedCertificate>>,
}

impl CertificateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `url` if its certificate has not expired at `now`.
    pub fn get(&self, url: &str, now: UnixTimestamp) -> Option<CachedCertificate> {
        self.entries
            .read()
            .get(url)
            .filter(|entry| entry.is_fresh(now))
            .cloned()
    }

    /// Replaces any entry for `url`.
    pub fn insert(&self, url: &str, entry: CachedCertificate) {
        self.entries.write().insert(url.to_owned(), entry);
    }

    /// Returns the fresh entry for `url`, or runs `validate` and stores its
    /// result. Failures are not cached.
    ///
    /// # Errors
    ///
    /// Propagates the error from `validate`.
    pub async fn get_or_validate<F, Fut, E>(
        &self,
        url: &str,
        now: UnixTimestamp,
        validate: F,
    ) -> Result<CachedCertificate, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachedCertificate, E>>,
    {
        if let Some(entry) = self.get(url, now) {
            log::debug!("Certificate cache hit for {url}");
            return Ok(entry);
        }
        log::debug!("Certificate cache miss for {url}");

        let entry = validate().await?;
        self.insert(url, entry.clone());
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
