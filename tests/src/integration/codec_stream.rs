//! End-to-end codec streaming: a large signed entry decoded from two
//! buffer fragments.

use bytes::BytesMut;
use hm_02_storage::DataEntry;
use hm_03_codec::{decode_header, encode};
use shared_crypto::test_utils::{TestKeyPair, TestSignatureFactory};
use shared_types::Id160;

#[test]
fn test_fragmented_signed_entry_round_trip() {
    let factory = TestSignatureFactory::new(TestKeyPair::from_low_u8(7));
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 239) as u8).collect();
    let original = DataEntry::new(payload)
        .with_ttl(42)
        .with_based_on(Id160::from_low_u64(0xabcd_ef01))
        .sign(&factory)
        .expect("signing succeeds");

    let mut wire = BytesMut::new();
    encode(&original, &mut wire);

    // The entry arrives in two 50 000-byte halves (plus the tail).
    let mut first = BytesMut::from(&wire[..50_000]);
    let mut second = BytesMut::from(&wire[50_000..]);

    let mut partial = decode_header(&mut first)
        .expect("well-formed header")
        .expect("header fits in the first half");
    assert!(
        !partial.decode_buffer(&mut first),
        "half the payload is still missing"
    );
    assert!(
        partial.decode_buffer(&mut second),
        "the second half completes the payload"
    );

    let decoded = partial
        .decode_done(&mut second, &factory, None)
        .expect("signature verifies");

    assert_eq!(decoded, original, "round trip is bit-exact");
    assert_eq!(decoded.ttl_seconds, Some(42));
    assert_eq!(decoded.based_on, Some(Id160::from_low_u64(0xabcd_ef01)));
    assert!(second.is_empty(), "nothing left after the signature");
}
