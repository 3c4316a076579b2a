#![no_main]

use libfuzzer_sys::fuzz_target;
use revtrie::store::page_codec;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must never panic the decoder
    let Ok(page) = page_codec::decode(data) else {
        return;
    };

    // Anything that decodes re-encodes to the same bytes
    let encoded = page_codec::encode(&page).expect("decoded page must encode");
    assert_eq!(encoded, data);

    let again = page_codec::decode(&encoded).expect("re-encoded page must decode");
    assert_eq!(again, page);
});
