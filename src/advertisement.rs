//! The Advertisement Record (§4.2): the opening packet describing a
//! resource/segment. Packed with `rmp_serde` into a self-describing binary
//! map, mirroring `styrene-rns-transport/src/resource.rs`'s
//! `ResourceAdvertisementFrame`, generalized so the hashmap slice size is
//! derived from the link's MDU at runtime rather than a compile-time
//! `PACKET_MDU` constant.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::ParcelError;
use crate::hash::{Hash, HASH_SIZE};

pub const MAPHASH_LEN: usize = 4;
pub const RANDOM_HASH_SIZE: usize = 4;
/// Fixed overhead of the packed advertisement record excluding the hashmap
/// tail, from the bit-exact constants in §6.
pub const ADV_OVERHEAD: usize = 134;

const FLAG_ENCRYPTED: u8 = 0x01;
const FLAG_COMPRESSED: u8 = 0x02;
const FLAG_SPLIT: u8 = 0x04;
const FLAG_REQUEST: u8 = 0x08;
const FLAG_RESPONSE: u8 = 0x10;
const FLAG_METADATA: u8 = 0x20;

/// `HASHMAP_MAX_LEN = floor((LINK_MDU - ADV_OVERHEAD) / MAPHASH_LEN)`.
///
/// Must be >= 1 for a link to be usable at all; callers that derive this
/// from real link MDUs should treat 0 as a configuration error.
pub fn hashmap_max_len(link_mdu: usize) -> usize {
    link_mdu.saturating_sub(ADV_OVERHEAD) / MAPHASH_LEN
}

/// `COLLISION_GUARD_SIZE = 2*WINDOW_MAX + HASHMAP_MAX_LEN`, the scan window
/// the sender searches for a requested part (original_source/RNS/Resource.py).
pub fn collision_guard_size(window_max: usize, link_mdu: usize) -> usize {
    2 * window_max + hashmap_max_len(link_mdu)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAdvertisement {
    /// Encrypted stream size in bytes.
    pub transfer_size: u64,
    /// Uncompressed payload size (incl. metadata).
    pub data_size: u64,
    /// Part count for this segment.
    pub parts: u32,
    pub hash: Hash,
    pub random_hash: [u8; RANDOM_HASH_SIZE],
    pub original_hash: Hash,
    pub segment_index: u32,
    pub total_segments: u32,
    pub request_id: Option<ByteBuf>,
    pub flags: u8,
    /// Up to `hashmap_max_len(link_mdu)` concatenated 4-byte map-hashes.
    pub hashmap: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AdvertisementFrame {
    #[serde(rename = "t")]
    transfer_size: u64,
    #[serde(rename = "d")]
    data_size: u64,
    #[serde(rename = "n")]
    parts: u32,
    #[serde(rename = "h", with = "serde_bytes")]
    hash: Vec<u8>,
    #[serde(rename = "r", with = "serde_bytes")]
    random_hash: Vec<u8>,
    #[serde(rename = "o", with = "serde_bytes")]
    original_hash: Vec<u8>,
    #[serde(rename = "i")]
    segment_index: u32,
    #[serde(rename = "l")]
    total_segments: u32,
    #[serde(rename = "q")]
    request_id: Option<ByteBuf>,
    #[serde(rename = "f")]
    flags: u8,
    #[serde(rename = "m", with = "serde_bytes")]
    hashmap: Vec<u8>,
}

impl ResourceAdvertisement {
    pub fn pack(&self) -> Result<Vec<u8>, ParcelError> {
        let frame = AdvertisementFrame {
            transfer_size: self.transfer_size,
            data_size: self.data_size,
            parts: self.parts,
            hash: self.hash.as_slice().to_vec(),
            random_hash: self.random_hash.to_vec(),
            original_hash: self.original_hash.as_slice().to_vec(),
            segment_index: self.segment_index,
            total_segments: self.total_segments,
            request_id: self.request_id.clone(),
            flags: self.flags,
            hashmap: self.hashmap.clone(),
        };
        rmp_serde::to_vec_named(&frame)
            .map_err(|e| ParcelError::Codec(format!("advertisement pack failed: {e}")))
    }

    pub fn unpack(data: &[u8]) -> Result<Self, ParcelError> {
        let frame: AdvertisementFrame = rmp_serde::from_slice(data)
            .map_err(|e| ParcelError::Codec(format!("advertisement unpack failed: {e}")))?;
        let hash = Hash::new(copy_hash(&frame.hash)?);
        let original_hash = Hash::new(copy_hash(&frame.original_hash)?);
        let random_hash = copy_fixed::<RANDOM_HASH_SIZE>(&frame.random_hash)?;
        Ok(Self {
            transfer_size: frame.transfer_size,
            data_size: frame.data_size,
            parts: frame.parts,
            hash,
            random_hash,
            original_hash,
            segment_index: frame.segment_index,
            total_segments: frame.total_segments,
            request_id: frame.request_id,
            flags: frame.flags,
            hashmap: frame.hashmap,
        })
    }

    pub fn encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    pub fn compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn split(&self) -> bool {
        self.flags & FLAG_SPLIT != 0
    }

    pub fn has_metadata(&self) -> bool {
        self.flags & FLAG_METADATA != 0
    }

    pub fn is_request(&self) -> bool {
        self.flags & FLAG_REQUEST != 0 && self.request_id.is_some()
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_RESPONSE != 0 && self.request_id.is_some()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn flags_for(
        encrypted: bool,
        compressed: bool,
        split: bool,
        has_metadata: bool,
        is_request: bool,
        is_response: bool,
    ) -> u8 {
        (encrypted as u8)
            | ((compressed as u8) << 1)
            | ((split as u8) << 2)
            | ((is_request as u8) << 3)
            | ((is_response as u8) << 4)
            | ((has_metadata as u8) << 5)
    }
}

fn copy_hash(bytes: &[u8]) -> Result<[u8; HASH_SIZE], ParcelError> {
    copy_fixed::<HASH_SIZE>(bytes)
}

fn copy_fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], ParcelError> {
    if bytes.len() != N {
        return Err(ParcelError::Codec(format!(
            "expected {N} bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::full_hash;

    fn sample() -> ResourceAdvertisement {
        ResourceAdvertisement {
            transfer_size: 1200,
            data_size: 1000,
            parts: 3,
            hash: full_hash(b"hash"),
            random_hash: [1, 2, 3, 4],
            original_hash: full_hash(b"original"),
            segment_index: 1,
            total_segments: 1,
            request_id: None,
            flags: ResourceAdvertisement::flags_for(true, false, false, false, false, false),
            hashmap: vec![0xAA; 12],
        }
    }

    #[test]
    fn pack_unpack_round_trips() {
        let adv = sample();
        let packed = adv.pack().unwrap();
        let unpacked = ResourceAdvertisement::unpack(&packed).unwrap();
        assert_eq!(adv, unpacked);
    }

    #[test]
    fn flag_bits_round_trip() {
        let adv = ResourceAdvertisement {
            flags: ResourceAdvertisement::flags_for(true, true, true, true, false, true),
            ..sample()
        };
        assert!(adv.encrypted());
        assert!(adv.compressed());
        assert!(adv.split());
        assert!(adv.has_metadata());
        assert!(!adv.is_request());
        // is_response also requires a request_id.
        assert!(!adv.is_response());
    }

    #[test]
    fn hashmap_max_len_matches_spec_formula() {
        // A plausible link MDU: derived HASHMAP_MAX_LEN must be positive.
        assert!(hashmap_max_len(500) > 0);
        assert_eq!(hashmap_max_len(134), 0);
    }
}
