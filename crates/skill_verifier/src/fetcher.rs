// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Retrieval of signing certificate chains, with bounded retries.

use std::time::Duration;

use url::Url;
use x509_cert::Certificate;

use crate::{
    error::{FetchError, SourceError},
    url_policy::SigningCertificateChainUrl,
};

/// Number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Fixed pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Something that can return the raw bytes served at a URL.
#[allow(async_fn_in_trait)]
pub trait ChainSource {
    /// Performs a single retrieval attempt. Anything other than a successful
    /// response with a body is an error.
    async fn get(&self, url: &Url) -> Result<Vec<u8>, SourceError>;
}

/// Returned by a [`Delay`] that was cancelled while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Waits between retrieval attempts.
#[allow(async_fn_in_trait)]
pub trait Delay {
    async fn wait(&self, duration: Duration) -> Result<(), Interrupted>;
}

/// A [`Delay`] backed by the tokio timer. Dropping the future cancels it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) -> Result<(), Interrupted> {
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// HTTPS [`ChainSource`]. Redirects are not followed, so the chain always
/// comes from the exact URL that passed validation.
#[derive(Clone)]
pub struct HttpChainSource {
    client: reqwest::Client,
}

impl HttpChainSource {
    /// Builds a source with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

impl ChainSource for HttpChainSource {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, SourceError> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Io(e.to_string()))?;
        Ok(body.to_vec())
    }
}

/// Downloads and parses certificate chains.
pub struct CertificateFetcher<S, D> {
    source: S,
    delay: D,
    policy: RetryPolicy,
}

impl<S: ChainSource, D: Delay> CertificateFetcher<S, D> {
    pub fn new(source: S, delay: D, policy: RetryPolicy) -> Self {
        Self {
            source,
            delay,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Retrieves the chain at `url` and parses it, leaf first. Accepts a PEM
    /// bundle or concatenated DER certificates.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] once every attempt has failed,
    /// [`FetchError::Interrupted`] if a wait between attempts is cancelled,
    /// and [`FetchError::MalformedCertificate`] if the body holds no usable
    /// certificates. A malformed body is not retried.
    pub async fn fetch(
        &self,
        url: &SigningCertificateChainUrl,
    ) -> Result<Vec<Certificate>, FetchError> {
        let body = self.fetch_body(url).await?;

        let chain =
            x509_util::parse_chain(&body).map_err(|e| FetchError::MalformedCertificate {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        if chain.is_empty() {
            return Err(FetchError::MalformedCertificate {
                url: url.to_string(),
                reason: "no certificates found".to_owned(),
            });
        }

        log::debug!("Fetched certificate chain of length {} from {url}", chain.len());
        Ok(chain)
    }

    async fn fetch_body(&self, url: &SigningCertificateChainUrl) -> Result<Vec<u8>, FetchError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match self.source.get(url.as_url()).await {
                Ok(body) => return Ok(body),
                Err(err) => err,
            };

            if attempts > self.policy.max_retries {
                log::error!(
                    url = url.as_str(), attempts = attempts;
                    "Giving up on certificate chain: {err}"
                );
                return Err(FetchError::Network {
                    url: url.to_string(),
                    attempts,
                    last: err,
                });
            }

            log::warn!(
                url = url.as_str(), attempt = attempts;
                "Certificate chain retrieval failed, retrying: {err}"
            );
            self.delay
                .wait(self.policy.delay)
                .await
                .map_err(|Interrupted| FetchError::Interrupted)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const CHAIN_PEM: &[u8] = include_bytes!("../tests/chain.pem");
    const CHAIN_DER: &[u8] = include_bytes!("../tests/chain.der");
    const CHAIN_URL: &str = "https://s3.amazonaws.com/echo.api/echo-api-cert.pem";

    // Replays scripted responses, then keeps returning the last one.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<u8>, SourceError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<u8>, SourceError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl ChainSource for &ScriptedSource {
        async fn get(&self, url: &Url) -> Result<Vec<u8>, SourceError> {
            self.calls.lock().push(url.to_string());
            let mut responses = self.responses.lock();
            match responses.len() {
                0 => Err(SourceError::Io("script exhausted".into())),
                1 => match &responses[0] {
                    Ok(body) => Ok(body.clone()),
                    Err(SourceError::Status(code)) => Err(SourceError::Status(*code)),
                    Err(SourceError::Io(msg)) => Err(SourceError::Io(msg.clone())),
                },
                _ => responses.pop_front().unwrap(),
            }
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        waits: Mutex<Vec<Duration>>,
        interrupt_after: Option<usize>,
    }

    impl Delay for &RecordingDelay {
        async fn wait(&self, duration: Duration) -> Result<(), Interrupted> {
            let mut waits = self.waits.lock();
            if self.interrupt_after == Some(waits.len()) {
                return Err(Interrupted);
            }
            waits.push(duration);
            Ok(())
        }
    }

    fn url() -> SigningCertificateChainUrl {
        SigningCertificateChainUrl::parse(CHAIN_URL).unwrap()
    }

    #[test]
    fn test_fetch_pem_and_der() {
        for body in [CHAIN_PEM, CHAIN_DER] {
            let source = ScriptedSource::new(vec![Ok(body.to_vec())]);
            let delay = RecordingDelay::default();
            let fetcher = CertificateFetcher::new(&source, &delay, RetryPolicy::default());

            let chain = block_on(fetcher.fetch(&url())).unwrap();
            assert_eq!(chain.len(), 2);
            assert_eq!(
                x509_util::dns_names(&chain[0]).unwrap(),
                vec!["echo-api.amazon.com".to_string()]
            );
            assert_eq!(source.calls(), 1);
            assert!(delay.waits.lock().is_empty());
        }
    }

    #[test]
    fn test_retries_until_success() {
        let source = ScriptedSource::new(vec![
            Err(SourceError::Status(503)),
            Err(SourceError::Io("connection reset".into())),
            Err(SourceError::Status(404)),
            Ok(CHAIN_PEM.to_vec()),
        ]);
        let delay = RecordingDelay::default();
        let fetcher = CertificateFetcher::new(&source, &delay, RetryPolicy::default());

        let chain = block_on(fetcher.fetch(&url())).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(source.calls(), 4);
        assert_eq!(*delay.waits.lock(), vec![DEFAULT_RETRY_DELAY; 3]);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let source = ScriptedSource::new(vec![Err(SourceError::Status(500))]);
        let delay = RecordingDelay::default();
        let fetcher = CertificateFetcher::new(&source, &delay, RetryPolicy::default());

        match block_on(fetcher.fetch(&url())) {
            Err(FetchError::Network {
                attempts,
                last: SourceError::Status(500),
                ..
            }) => assert_eq!(attempts, 6),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(source.calls(), 6);
        assert_eq!(delay.waits.lock().len(), 5);
    }

    #[test]
    fn test_zero_retries() {
        let source = ScriptedSource::new(vec![Err(SourceError::Status(500))]);
        let delay = RecordingDelay::default();
        let policy = RetryPolicy {
            max_retries: 0,
            delay: Duration::from_secs(1),
        };
        let fetcher = CertificateFetcher::new(&source, &delay, policy);

        assert!(matches!(
            block_on(fetcher.fetch(&url())),
            Err(FetchError::Network { attempts: 1, .. })
        ));
        assert!(delay.waits.lock().is_empty());
    }

    #[test]
    fn test_interrupted_wait_stops_retrying() {
        let source = ScriptedSource::new(vec![Err(SourceError::Status(503))]);
        let delay = RecordingDelay {
            interrupt_after: Some(2),
            ..Default::default()
        };
        let fetcher = CertificateFetcher::new(&source, &delay, RetryPolicy::default());

        assert!(matches!(
            block_on(fetcher.fetch(&url())),
            Err(FetchError::Interrupted)
        ));
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn test_malformed_body_is_not_retried() {
        for body in [
            &b""[..],
            &b"   \n"[..],
            &b"this is not a certificate"[..],
            &b"\x30\x03\x02\x01"[..],
        ] {
            let source = ScriptedSource::new(vec![Ok(body.to_vec())]);
            let delay = RecordingDelay::default();
            let fetcher = CertificateFetcher::new(&source, &delay, RetryPolicy::default());

            assert!(
                matches!(
                    block_on(fetcher.fetch(&url())),
                    Err(FetchError::MalformedCertificate { .. })
                ),
                "{body:?}"
            );
            assert_eq!(source.calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_delay_waits_for_duration() {
        let start = tokio::time::Instant::now();
        TokioDelay.wait(DEFAULT_RETRY_DELAY).await.unwrap();
        assert!(start.elapsed() >= DEFAULT_RETRY_DELAY);
    }

    mod http {
        use super::*;
        use wiremock::{
            matchers::{header, method, path},
            Mock, MockServer, ResponseTemplate,
        };

        fn source() -> HttpChainSource {
            HttpChainSource::new(Duration::from_secs(5), "skill-verifier-test").unwrap()
        }

        #[tokio::test]
        async fn test_http_source_returns_body() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/echo.api/echo-api-cert.pem"))
                .and(header("user-agent", "skill-verifier-test"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(CHAIN_PEM))
                .expect(1)
                .mount(&server)
                .await;

            let url = Url::parse(&format!("{}/echo.api/echo-api-cert.pem", server.uri())).unwrap();
            let body = source().get(&url).await.unwrap();
            assert_eq!(body, CHAIN_PEM);
        }

        #[tokio::test]
        async fn test_http_source_requires_200() {
            let server = MockServer::start().await;
            Mock::given(path("/not-found"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
            Mock::given(path("/no-content"))
                .respond_with(ResponseTemplate::new(204))
                .mount(&server)
                .await;

            for (p, want) in [("/not-found", 404), ("/no-content", 204)] {
                let url = Url::parse(&format!("{}{p}", server.uri())).unwrap();
                match source().get(&url).await {
                    Err(SourceError::Status(code)) => assert_eq!(code, want),
                    other => panic!("{p}: unexpected {other:?}"),
                }
            }
        }

        #[tokio::test]
        async fn test_http_source_does_not_follow_redirects() {
            let server = MockServer::start().await;
            Mock::given(path("/moved"))
                .respond_with(
                    ResponseTemplate::new(302)
                        .insert_header("location", format!("{}/target", server.uri())),
                )
                .mount(&server)
                .await;
            Mock::given(path("/target"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(CHAIN_PEM))
                .expect(0)
                .mount(&server)
                .await;

            let url = Url::parse(&format!("{}/moved", server.uri())).unwrap();
            assert!(matches!(
                source().get(&url).await,
                Err(SourceError::Status(302))
            ));
        }
    }
}
