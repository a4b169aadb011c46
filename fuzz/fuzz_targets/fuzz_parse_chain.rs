#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(chain) = x509_util::parse_chain(data) {
        for cert in &chain {
            let _ = x509_util::not_after(cert);
            let _ = x509_util::dns_names(cert);
        }
    }
});
