// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Validation of the signing certificate chain URL supplied with a request.
//!
//! The URL comes from an untrusted request header, so it is checked against a
//! fixed policy before any network access happens.

use std::fmt;

use url::Url;

use crate::error::UrlError;

/// The only host allowed to serve signing certificate chains.
pub const TRUSTED_HOSTNAME: &str = "s3.amazonaws.com";

/// Required prefix of the URL path.
pub const TRUSTED_PATH_PREFIX: &str = "/echo.api/";

pub const TRUSTED_PROTOCOL: &str = "https";

/// Default port of [`TRUSTED_PROTOCOL`]; the only port that may be spelled out.
pub const TRUSTED_PORT: u16 = 443;

/// A URL that satisfies the signing certificate chain URL policy. Holding one
/// is proof that the checks in [`SigningCertificateChainUrl::parse`] passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningCertificateChainUrl(Url);

impl SigningCertificateChainUrl {
    /// Parses and validates a raw signing certificate chain URL. Dot segments
    /// in the path are resolved before the path prefix is checked.
    ///
    /// # Errors
    ///
    /// Returns a [`UrlError`] naming the first failed check, in order:
    /// syntax, host, path prefix, protocol, port.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let url = Url::parse(raw).map_err(|source| UrlError::Malformed {
            url: raw.to_owned(),
            source,
        })?;

        if !url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(TRUSTED_HOSTNAME))
        {
            return Err(UrlError::Hostname {
                url: raw.to_owned(),
                expected: TRUSTED_HOSTNAME,
            });
        }

        if !url.path().starts_with(TRUSTED_PATH_PREFIX) {
            return Err(UrlError::PathPrefix {
                url: raw.to_owned(),
                expected: TRUSTED_PATH_PREFIX,
            });
        }

        if !url.scheme().eq_ignore_ascii_case(TRUSTED_PROTOCOL) {
            return Err(UrlError::Protocol {
                url: raw.to_owned(),
                protocol: url.scheme().to_owned(),
            });
        }

        // `Url::port` hides a port equal to the scheme default.
        if let Some(port) = url.port().filter(|&port| port != TRUSTED_PORT) {
            return Err(UrlError::Port {
                url: raw.to_owned(),
                port,
            });
        }

        Ok(Self(url))
    }

    #[must_use]
    pub fn as_url(&self) -> &Url {
        &self.0
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<&str> for SigningCertificateChainUrl {
    type Error = UrlError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl fmt::Display for SigningCertificateChainUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
