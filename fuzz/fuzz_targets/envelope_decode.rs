//! Fuzz the envelope codec: arbitrary bytes must never panic the decoder,
//! and anything that decodes must round-trip.

#![no_main]

use libfuzzer_sys::fuzz_target;

use accord_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        // Local-only kinds refuse to encode; everything else round-trips.
        if !envelope.message.is_local() {
            let wire = envelope.encode().expect("decoded envelope must re-encode");
            let again = Envelope::decode(&wire).expect("re-encoded envelope must decode");
            assert_eq!(envelope, again);
        }
    }
});
