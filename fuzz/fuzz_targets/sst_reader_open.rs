#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use sstingest::sst::SstIter;
use sstingest::MvccIterator;

fuzz_target!(|data: &[u8]| {
    let Ok(mut iter) = SstIter::open(Bytes::copy_from_slice(data), true) else {
        return;
    };
    iter.seek_to_first();
    while let Ok(Some(_)) = iter.current() {
        iter.next();
    }
});
