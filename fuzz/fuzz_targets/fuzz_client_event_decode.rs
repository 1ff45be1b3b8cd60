#![no_main]

use libfuzzer_sys::fuzz_target;

use livepoll::server::ws::ClientEvent;

// Decoding arbitrary frames must never panic, and anything that decodes
// must survive a re-encode with the same event name.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(event) = ClientEvent::decode(text) else {
        return;
    };
    let encoded = serde_json::to_value(&event).expect("decoded event re-encodes");
    assert_eq!(encoded["event"], event.name());
});
