#![no_main]
use common::BlobId;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(blob_id) = BlobId::decode(raw) {
        let reparsed = BlobId::decode(&blob_id.to_string()).expect("encoded id must decode");
        assert_eq!(blob_id, reparsed);
    }
});
