#![no_main]

use libfuzzer_sys::fuzz_target;
use skill_verifier::{timestamp::parse_timestamp, TimestampGuard};

fuzz_target!(|data: (&str, u64)| {
    let (value, now) = data;
    if parse_timestamp(value).is_ok() {
        let _ = TimestampGuard::default().check(value, now);
    }
});
