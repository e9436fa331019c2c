//! Shared helpers between sender and receiver, grounded on
//! `styrene-rns-transport/src/resource/utils.rs`'s `map_hash` /
//! `slice_hashmap_segment` / `random_bytes`.

use crate::advertisement::{hashmap_max_len, MAPHASH_LEN, RANDOM_HASH_SIZE};
use crate::hash::{full_hash, random_bytes};

/// `map_hash(p) = FULL_HASH(p || random_hash)[:MAPHASH_LEN]`.
pub fn map_hash(part: &[u8], random_hash: &[u8; RANDOM_HASH_SIZE]) -> [u8; MAPHASH_LEN] {
    let mut buf = Vec::with_capacity(part.len() + RANDOM_HASH_SIZE);
    buf.extend_from_slice(part);
    buf.extend_from_slice(random_hash);
    let digest = full_hash(&buf);
    let mut out = [0u8; MAPHASH_LEN];
    out.copy_from_slice(&digest.as_slice()[..MAPHASH_LEN]);
    out
}

pub fn new_random_salt() -> [u8; RANDOM_HASH_SIZE] {
    random_bytes::<RANDOM_HASH_SIZE>()
}

/// Slices out the `segment`-th chunk of a flat concatenated hashmap, bounded
/// by the link's `hashmap_max_len`.
pub fn slice_hashmap_segment(hashmap: &[u8], segment: u32, link_mdu: usize) -> Vec<u8> {
    let seg_len = hashmap_max_len(link_mdu);
    let start = (segment as usize) * seg_len * MAPHASH_LEN;
    let end = core::cmp::min(start + seg_len * MAPHASH_LEN, hashmap.len());
    if start >= hashmap.len() {
        return Vec::new();
    }
    hashmap[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_hash_is_deterministic_and_salt_sensitive() {
        let part = b"some part bytes";
        let salt_a = [1, 2, 3, 4];
        let salt_b = [5, 6, 7, 8];
        assert_eq!(map_hash(part, &salt_a), map_hash(part, &salt_a));
        assert_ne!(map_hash(part, &salt_a), map_hash(part, &salt_b));
    }

    #[test]
    fn hashmap_segment_slicing_covers_whole_map() {
        let hashmap = vec![7u8; 4 * 50]; // 50 entries
        let link_mdu = 134 + 4 * 10; // hashmap_max_len == 10 entries/segment
        let mut rebuilt = Vec::new();
        for seg in 0.. {
            let chunk = slice_hashmap_segment(&hashmap, seg, link_mdu);
            if chunk.is_empty() {
                break;
            }
            rebuilt.extend_from_slice(&chunk);
        }
        assert_eq!(rebuilt, hashmap);
    }
}
