#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use sstingest::mvcc_key::MvccKey;

fuzz_target!(|data: &[u8]| {
    if let Ok((key, used)) = MvccKey::decode(&Bytes::copy_from_slice(data)) {
        assert_eq!(key.encoded_len(), used);
    }
});
