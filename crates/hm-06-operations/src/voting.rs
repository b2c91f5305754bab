//! Majority-based merge of raw per-peer results.
//!
//! Replicas drift under churn, so a distributed read asks R peers and votes:
//! a key needs strictly more than half the raw responses behind it; an
//! entry's payload wins with a majority of identical content hashes, or by
//! being the only version anyone returned.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use hm_02_storage::{DataEntry, DigestInfo};
use shared_types::{Id160, Key640};

/// Merge bare key sets: keep keys present in `> raw.len() / 2` responses.
pub fn evaluate_keys(raw: &[BTreeSet<Key640>]) -> BTreeSet<Key640> {
    let mut votes: BTreeMap<Key640, usize> = BTreeMap::new();
    for response in raw {
        for key in response {
            *votes.entry(*key).or_default() += 1;
        }
    }
    votes
        .into_iter()
        .filter(|(_, count)| count * 2 > raw.len())
        .map(|(key, _)| key)
        .collect()
}

/// Merge entry maps per key: a value wins with a strict majority of
/// identical content hashes, or by being the only version present.
pub fn evaluate_entries(raw: &[BTreeMap<Key640, DataEntry>]) -> BTreeMap<Key640, DataEntry> {
    let total = raw.len();
    let mut grouped: BTreeMap<Key640, HashMap<Id160, (usize, DataEntry)>> = BTreeMap::new();
    for response in raw {
        for (key, entry) in response {
            let variants = grouped.entry(*key).or_default();
            let variant = variants
                .entry(entry.content_hash())
                .or_insert_with(|| (0, entry.clone()));
            variant.0 += 1;
        }
    }

    let mut merged = BTreeMap::new();
    for (key, variants) in grouped {
        if variants.len() == 1 {
            let (_, (_, entry)) = variants.into_iter().next().expect("one variant");
            merged.insert(key, entry);
            continue;
        }
        if let Some((_, (_, entry))) = variants
            .into_iter()
            .find(|(_, (count, _))| count * 2 > total)
        {
            merged.insert(key, entry);
        }
        // Diverging versions with no majority: the key is dropped, the
        // caller sees no authoritative value.
    }
    merged
}

/// Merge digests: a `(key, hash)` pair needs a strict majority, unless it is
/// the only hash reported for its key.
pub fn evaluate_digests(raw: &[DigestInfo]) -> DigestInfo {
    let total = raw.len();
    let mut grouped: BTreeMap<Key640, HashMap<Id160, usize>> = BTreeMap::new();
    for response in raw {
        for (key, hash) in &response.entries {
            *grouped.entry(*key).or_default().entry(*hash).or_default() += 1;
        }
    }

    let mut entries = BTreeMap::new();
    for (key, hashes) in grouped {
        if hashes.len() == 1 {
            let (hash, _) = hashes.into_iter().next().expect("one hash");
            entries.insert(key, hash);
            continue;
        }
        if let Some((hash, _)) = hashes.into_iter().find(|(_, count)| count * 2 > total) {
            entries.insert(key, hash);
        }
    }
    DigestInfo { entries }
}
