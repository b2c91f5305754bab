//! Compact bloom filters over 160-bit identifiers.
//!
//! Range queries and digests can carry a filter instead of a key list so a
//! replica can narrow a scan without shipping every key it knows. The filter
//! uses double hashing: the identifier already is a uniform hash, so the two
//! base values are lifted straight out of its bytes.

use bytes::{Buf, BufMut};

use crate::errors::DecodeError;
use crate::id::Id160;

/// Largest filter accepted off the wire, in bits.
const MAX_FILTER_BITS: u32 = 1 << 20;

/// A fixed-size bloom filter keyed by [`Id160`] values.
///
/// No false negatives: an inserted identifier always tests positive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleBloomFilter {
    /// Number of bits in the filter.
    m: u32,
    /// Number of probe positions per element.
    k: u8,
    bits: Vec<u8>,
}

impl SimpleBloomFilter {
    /// Create a filter sized for `expected_elements` at roughly
    /// `false_positive_rate` (clamped to a sane range).
    pub fn with_capacity(expected_elements: usize, false_positive_rate: f64) -> Self {
        let n = expected_elements.max(1) as f64;
        let p = false_positive_rate.clamp(0.0001, 0.5);

        // Standard sizing: m = -n·ln p / (ln 2)², k = (m/n)·ln 2.
        let ln2 = std::f64::consts::LN_2;
        let m = ((-n * p.ln()) / (ln2 * ln2)).ceil() as u32;
        let m = m.clamp(64, MAX_FILTER_BITS);
        let k = ((m as f64 / n) * ln2).round().clamp(1.0, 16.0) as u8;

        Self {
            m,
            k,
            bits: vec![0u8; m.div_ceil(8) as usize],
        }
    }

    /// Base hash pair for double hashing. The id bytes are already uniform,
    /// so two disjoint 64-bit windows serve as the two hash functions.
    fn hash_pair(id: &Id160) -> (u64, u64) {
        let bytes = id.as_bytes();
        let h1 = u64::from_be_bytes(bytes[0..8].try_into().expect("8-byte window"));
        let h2 = u64::from_be_bytes(bytes[8..16].try_into().expect("8-byte window"));
        // An odd step is coprime with any power-of-two-free modulus walk.
        (h1, h2 | 1)
    }

    fn probe(&self, id: &Id160, i: u32) -> usize {
        let (h1, h2) = Self::hash_pair(id);
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.m as u64) as usize
    }

    pub fn insert(&mut self, id: &Id160) {
        for i in 0..self.k as u32 {
            let bit = self.probe(id, i);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn contains(&self, id: &Id160) -> bool {
        (0..self.k as u32).all(|i| {
            let bit = self.probe(id, i);
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    pub fn bit_count(&self) -> u32 {
        self.m
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32(self.m);
        buf.put_u8(self.k);
        buf.put_u32(self.bits.len() as u32);
        buf.put_slice(&self.bits);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, DecodeError> {
        if buf.remaining() < 9 {
            return Err(DecodeError::UnexpectedEnd("bloom header"));
        }
        let m = buf.get_u32();
        let k = buf.get_u8();
        let len = buf.get_u32() as usize;
        if m == 0 || m > MAX_FILTER_BITS || len != (m as usize).div_ceil(8) || k == 0 {
            return Err(DecodeError::InvalidValue {
                field: "bloom geometry",
                value: m as u64,
            });
        }
        if buf.remaining() < len {
            return Err(DecodeError::UnexpectedEnd("bloom bits"));
        }
        let mut bits = vec![0u8; len];
        buf.copy_to_slice(&mut bits);
        Ok(Self { m, k, bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_no_false_negatives() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut filter = SimpleBloomFilter::with_capacity(100, 0.01);

        let ids: Vec<Id160> = (0..100).map(|_| Id160::random(&mut rng)).collect();
        for id in &ids {
            filter.insert(id);
        }
        for id in &ids {
            assert!(filter.contains(id), "inserted id must test positive");
        }
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut filter = SimpleBloomFilter::with_capacity(100, 0.01);
        for _ in 0..100 {
            filter.insert(&Id160::random(&mut rng));
        }

        let false_positives = (0..10_000)
            .filter(|_| filter.contains(&Id160::random(&mut rng)))
            .count();

        // Generous bound: 1% target, allow 5x slack for hash quirks.
        assert!(
            false_positives < 500,
            "false positive rate too high: {false_positives}/10000"
        );
    }

    #[test]
    fn test_wire_round_trip() {
        let mut filter = SimpleBloomFilter::with_capacity(10, 0.05);
        filter.insert(&Id160::from_low_u8(1));
        filter.insert(&Id160::from_low_u8(2));

        let mut buf = bytes::BytesMut::new();
        filter.encode(&mut buf);
        let decoded = SimpleBloomFilter::decode(&mut buf).expect("well-formed filter");

        assert_eq!(decoded, filter);
        assert!(decoded.contains(&Id160::from_low_u8(1)));
    }

    #[test]
    fn test_decode_rejects_inconsistent_geometry() {
        let mut buf = bytes::BytesMut::new();
        buf.put_u32(128);
        buf.put_u8(3);
        buf.put_u32(99); // wrong byte length for 128 bits
        buf.put_slice(&[0u8; 99]);

        assert!(SimpleBloomFilter::decode(&mut buf).is_err());
    }
}
