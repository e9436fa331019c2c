//! Compact binary wire formats for REQ / HMU / PROOF / ICL / RCL, as
//! distinct from the msgpack-based advertisement record. Ported from
//! `styrene-rns-transport/src/resource.rs`'s `ResourceRequest` /
//! `ResourceHashUpdate` / `ResourceProof`, plus the ICL/RCL cancellation
//! payloads the teacher's resource module never encoded as types (it built
//! them inline in `utils.rs`/`manager.rs`) — added here for symmetry.

use serde::{Deserialize, Serialize};

use crate::advertisement::MAPHASH_LEN;
use crate::error::ParcelError;
use crate::hash::{Hash, HASH_SIZE};

const HASHMAP_IS_EXHAUSTED: u8 = 0xFF;
const HASHMAP_IS_NOT_EXHAUSTED: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub hashmap_exhausted: bool,
    pub last_map_hash: Option<[u8; MAPHASH_LEN]>,
    pub resource_hash: Hash,
    pub requested_hashes: Vec<[u8; MAPHASH_LEN]>,
}

impl ResourceRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            1 + MAPHASH_LEN + HASH_SIZE + self.requested_hashes.len() * MAPHASH_LEN,
        );
        if self.hashmap_exhausted {
            out.push(HASHMAP_IS_EXHAUSTED);
            out.extend_from_slice(&self.last_map_hash.unwrap_or([0u8; MAPHASH_LEN]));
        } else {
            out.push(HASHMAP_IS_NOT_EXHAUSTED);
        }
        out.extend_from_slice(self.resource_hash.as_slice());
        for hash in &self.requested_hashes {
            out.extend_from_slice(hash);
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParcelError> {
        if data.is_empty() {
            return Err(ParcelError::Codec("empty REQ payload".into()));
        }
        let hashmap_exhausted = data[0] == HASHMAP_IS_EXHAUSTED;
        let mut offset = 1;

        let last_map_hash = if hashmap_exhausted {
            let hash = copy_fixed::<MAPHASH_LEN>(slice(data, offset, MAPHASH_LEN)?)?;
            offset += MAPHASH_LEN;
            Some(hash)
        } else {
            None
        };

        let resource_hash = Hash::new(copy_fixed::<HASH_SIZE>(slice(data, offset, HASH_SIZE)?)?);
        offset += HASH_SIZE;

        let mut requested_hashes = Vec::new();
        while offset + MAPHASH_LEN <= data.len() {
            requested_hashes.push(copy_fixed::<MAPHASH_LEN>(&data[offset..offset + MAPHASH_LEN])?);
            offset += MAPHASH_LEN;
        }

        Ok(Self { hashmap_exhausted, last_map_hash, resource_hash, requested_hashes })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HashUpdateFrame(u32, #[serde(with = "serde_bytes")] Vec<u8>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHashUpdate {
    pub resource_hash: Hash,
    pub segment: u32,
    pub hashmap: Vec<u8>,
}

impl ResourceHashUpdate {
    pub fn encode(&self) -> Result<Vec<u8>, ParcelError> {
        let mut out = Vec::with_capacity(HASH_SIZE + self.hashmap.len() + 8);
        out.extend_from_slice(self.resource_hash.as_slice());
        let frame = rmp_serde::to_vec(&HashUpdateFrame(self.segment, self.hashmap.clone()))
            .map_err(|e| ParcelError::Codec(format!("HMU encode failed: {e}")))?;
        out.extend_from_slice(&frame);
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParcelError> {
        if data.len() < HASH_SIZE {
            return Err(ParcelError::Codec("HMU payload too short".into()));
        }
        let resource_hash = Hash::new(copy_fixed::<HASH_SIZE>(&data[..HASH_SIZE])?);
        let frame: HashUpdateFrame = rmp_serde::from_slice(&data[HASH_SIZE..])
            .map_err(|e| ParcelError::Codec(format!("HMU decode failed: {e}")))?;
        Ok(Self { resource_hash, segment: frame.0, hashmap: frame.1 })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceProof {
    pub resource_hash: Hash,
    pub proof: Hash,
}

impl ResourceProof {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HASH_SIZE * 2);
        out.extend_from_slice(self.resource_hash.as_slice());
        out.extend_from_slice(self.proof.as_slice());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParcelError> {
        if data.len() < HASH_SIZE * 2 {
            return Err(ParcelError::Codec("PROOF payload too short".into()));
        }
        let resource_hash = Hash::new(copy_fixed::<HASH_SIZE>(&data[..HASH_SIZE])?);
        let proof = Hash::new(copy_fixed::<HASH_SIZE>(&data[HASH_SIZE..HASH_SIZE * 2])?);
        Ok(Self { resource_hash, proof })
    }
}

/// ICL (initiator cancel) / RCL (receiver reject) payloads: both are a bare
/// 32-byte resource hash.
pub fn encode_cancel(resource_hash: Hash) -> Vec<u8> {
    resource_hash.as_slice().to_vec()
}

pub fn decode_cancel(data: &[u8]) -> Result<Hash, ParcelError> {
    if data.len() != HASH_SIZE {
        return Err(ParcelError::Codec("cancel payload must be exactly one hash".into()));
    }
    Ok(Hash::new(copy_fixed::<HASH_SIZE>(data)?))
}

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParcelError> {
    data.get(offset..offset + len)
        .ok_or_else(|| ParcelError::Codec("REQ payload truncated".into()))
}

fn copy_fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], ParcelError> {
    if bytes.len() != N {
        return Err(ParcelError::Codec(format!("expected {N} bytes, got {}", bytes.len())));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::full_hash;

    #[test]
    fn request_round_trips_without_hmu() {
        let req = ResourceRequest {
            hashmap_exhausted: false,
            last_map_hash: None,
            resource_hash: full_hash(b"r"),
            requested_hashes: vec![[1, 2, 3, 4], [5, 6, 7, 8]],
        };
        let decoded = ResourceRequest::decode(&req.encode()).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn request_round_trips_with_exhausted_flag() {
        let req = ResourceRequest {
            hashmap_exhausted: true,
            last_map_hash: Some([9, 9, 9, 9]),
            resource_hash: full_hash(b"r"),
            requested_hashes: vec![],
        };
        let decoded = ResourceRequest::decode(&req.encode()).unwrap();
        assert_eq!(req, decoded);
    }

    #[test]
    fn hash_update_round_trips() {
        let hmu = ResourceHashUpdate { resource_hash: full_hash(b"r"), segment: 2, hashmap: vec![1; 40] };
        let decoded = ResourceHashUpdate::decode(&hmu.encode().unwrap()).unwrap();
        assert_eq!(hmu, decoded);
    }

    #[test]
    fn proof_round_trips() {
        let proof = ResourceProof { resource_hash: full_hash(b"r"), proof: full_hash(b"p") };
        let decoded = ResourceProof::decode(&proof.encode()).unwrap();
        assert_eq!(proof, decoded);
    }

    #[test]
    fn cancel_round_trips() {
        let hash = full_hash(b"cancel-me");
        assert_eq!(decode_cancel(&encode_cancel(hash)).unwrap(), hash);
    }
}
