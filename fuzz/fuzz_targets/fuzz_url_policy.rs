#![no_main]

use libfuzzer_sys::fuzz_target;
use skill_verifier::url_policy::{SigningCertificateChainUrl, TRUSTED_HOSTNAME, TRUSTED_PATH_PREFIX};

fuzz_target!(|data: &str| {
    if let Ok(url) = SigningCertificateChainUrl::parse(data) {
        let url = url.as_url();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some(TRUSTED_HOSTNAME));
        assert!(url.path().starts_with(TRUSTED_PATH_PREFIX));
        assert_eq!(url.port(), None);
    }
});
