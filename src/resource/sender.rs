//! Sender-side state machine (§3 steps 1-8, §4.3): segmentation, optional
//! compression, link encryption, part partitioning, request handling, proof
//! verification and segment chaining. Grounded on
//! `styrene-rns-transport/src/resource/sender.rs` and the construction order
//! in `original_source/RNS/Resource.py::__init__`/`__prepare_next_segment`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::advertisement::{collision_guard_size, ResourceAdvertisement, RANDOM_HASH_SIZE};
use crate::compress;
use crate::config::ResourceConfig;
use crate::error::ParcelError;
use crate::hash::{full_hash, Hash};
use crate::link::Link;
use crate::packet::{LinkPacket, PacketContext};
use crate::resource::utils::{map_hash, new_random_salt};
use crate::resource::window::WindowController;
use crate::resource::{ResourceProgress, ResourceStatus, AUTO_COMPRESS_MAX_SIZE, MAX_EFFICIENT_SIZE};
use crate::wire::{ResourceProof, ResourceRequest};

#[derive(Debug, Serialize, Deserialize)]
struct PayloadFrame {
    #[serde(with = "serde_bytes")]
    metadata: Vec<u8>,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

struct Part {
    map_hash: [u8; 4],
    bytes: Vec<u8>,
    acked: bool,
}

/// One outgoing resource (or one segment of a chained multi-segment
/// resource). The caller drives it by feeding it `REQ`/`PROOF` payloads
/// observed on the link and polling `tick` from the watchdog.
pub struct ResourceSender {
    pub hash: Hash,
    pub original_hash: Hash,
    pub segment_index: u32,
    pub total_segments: u32,
    pub status: ResourceStatus,

    config: ResourceConfig,
    window: WindowController,
    parts: Vec<Part>,
    random_hash: [u8; RANDOM_HASH_SIZE],
    data_size: u64,
    transfer_size: u64,
    link_mdu: usize,
    request_id: Option<Vec<u8>>,
    is_response: bool,
    has_metadata: bool,
    compressed: bool,
    auto_compress: bool,

    expected_proof: Hash,
    last_activity: Instant,
    adv_retries: u32,
    part_retries: u32,
    outstanding: HashSet<usize>,
    timeout_override: Option<Duration>,

    /// Pre-built next segment, eagerly prepared while this one is still in
    /// flight so advertising it costs no extra round trip.
    next_segment: Option<Box<ResourceSender>>,
    remaining_payload: Option<Vec<u8>>,
}

impl ResourceSender {
    /// Builds the first segment (and stages any further ones) of a new
    /// outgoing resource from plaintext `data` with optional `metadata`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
        link: &dyn Link,
        config: ResourceConfig,
        request_id: Option<Vec<u8>>,
        is_response: bool,
        auto_compress: bool,
        timeout: Option<Duration>,
        now: Instant,
    ) -> Result<Self, ParcelError> {
        let frame = PayloadFrame { metadata: metadata.unwrap_or_default(), data };
        let has_metadata = !frame.metadata.is_empty();
        let framed = rmp_serde::to_vec(&frame)
            .map_err(|e| ParcelError::Codec(format!("payload frame encode failed: {e}")))?;

        let mut chunks = split_into_segments(framed);
        let total_segments = chunks.len() as u32;
        let first_chunk = chunks.remove(0);
        let remaining: Vec<Vec<u8>> = chunks;

        let mut sender = Self::build_segment(
            first_chunk,
            has_metadata,
            0,
            total_segments,
            Hash::new_empty(), // patched to self-reference below
            link,
            &config,
            request_id.clone(),
            is_response,
            auto_compress,
            now,
        )?;
        sender.original_hash = sender.hash;
        sender.timeout_override = timeout;
        sender.remaining_payload = if remaining.is_empty() {
            None
        } else {
            Some(remaining.into_iter().flatten().collect())
        };
        Ok(sender)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_segment(
        chunk: Vec<u8>,
        has_metadata: bool,
        segment_index: u32,
        total_segments: u32,
        original_hash: Hash,
        link: &dyn Link,
        config: &ResourceConfig,
        request_id: Option<Vec<u8>>,
        is_response: bool,
        auto_compress: bool,
        now: Instant,
    ) -> Result<Self, ParcelError> {
        let data_size = chunk.len() as u64;

        let compressed = if auto_compress && data_size <= AUTO_COMPRESS_MAX_SIZE {
            compress::compress(&chunk).ok()
        } else {
            None
        };
        let (payload, compressed_flag) = match compressed {
            Some(c) if c.len() < chunk.len() => (c, true),
            _ => (chunk, false),
        };

        // §3/§4.3: hash and proof certify the salted plaintext, computed
        // before encryption, not the ciphertext — a conforming peer must be
        // able to verify assembly without knowing how the link encrypts.
        // The salt is embedded in the ciphertext that gets partitioned, so a
        // map-hash collision forces re-salting, re-encrypting and
        // re-partitioning together, not just a repartition of the same
        // ciphertext under a different salt.
        let sdu = link.mdu().max(1);
        let (random_hash, hash, expected_proof, ciphertext, parts) = loop {
            let random_hash = new_random_salt();
            let hash = full_hash(&[payload.as_slice(), &random_hash].concat());
            let expected_proof = full_hash(&[payload.as_slice(), hash.as_slice()].concat());

            let mut salted = Vec::with_capacity(random_hash.len() + payload.len());
            salted.extend_from_slice(&random_hash);
            salted.extend_from_slice(&payload);
            let ciphertext = link.encrypt(&salted)?;

            let parts = partition_parts(&ciphertext, sdu, random_hash);
            if has_map_hash_collision(&parts) {
                log::debug!("map-hash collision for segment {segment_index}, re-rolling random_hash");
                continue;
            }
            break (random_hash, hash, expected_proof, ciphertext, parts);
        };
        let transfer_size = ciphertext.len() as u64;

        let warm_window = link.last_resource_window();
        let window = match warm_window {
            Some(w) => WindowController::with_warm_start(config, w),
            None => WindowController::new(config),
        };

        Ok(Self {
            hash,
            original_hash,
            segment_index,
            total_segments,
            status: ResourceStatus::Queued,
            config: *config,
            window,
            parts,
            random_hash,
            data_size,
            transfer_size,
            link_mdu: link.mdu(),
            request_id,
            is_response,
            has_metadata,
            compressed: compressed_flag,
            auto_compress,
            expected_proof,
            last_activity: now,
            adv_retries: 0,
            part_retries: 0,
            outstanding: HashSet::new(),
            timeout_override: None,
            next_segment: None,
            remaining_payload: None,
        })
    }

    /// Eagerly builds the next chained segment, if one is pending, so it is
    /// ready to advertise the instant this segment's proof arrives.
    pub fn prepare_next_segment(&mut self, link: &dyn Link, now: Instant) -> Result<(), ParcelError> {
        if self.next_segment.is_some() {
            return Ok(());
        }
        let Some(payload) = self.remaining_payload.take() else { return Ok(()) };
        let chunks = split_into_segments(payload);
        let mut chunks = chunks.into_iter();
        let next_chunk = chunks.next().unwrap_or_default();
        let remaining: Vec<u8> = chunks.flatten().collect();

        let mut next = Self::build_segment(
            next_chunk,
            false,
            self.segment_index + 1,
            self.total_segments,
            self.original_hash,
            link,
            &self.config,
            self.request_id.clone(),
            self.is_response,
            self.auto_compress,
            now,
        )?;
        next.remaining_payload = if remaining.is_empty() { None } else { Some(remaining) };
        self.next_segment = Some(Box::new(next));
        Ok(())
    }

    pub fn take_next_segment(&mut self) -> Option<Box<ResourceSender>> {
        self.next_segment.take()
    }

    pub fn advertisement(&self) -> ResourceAdvertisement {
        let hashmap: Vec<u8> = self
            .parts
            .iter()
            .take(crate::advertisement::hashmap_max_len(self.link_mdu))
            .flat_map(|p| p.map_hash)
            .collect();

        ResourceAdvertisement {
            transfer_size: self.transfer_size,
            data_size: self.data_size,
            parts: self.parts.len() as u32,
            hash: self.hash,
            random_hash: self.random_hash,
            original_hash: self.original_hash,
            segment_index: self.segment_index,
            total_segments: self.total_segments,
            request_id: self.request_id.clone().map(serde_bytes::ByteBuf::from),
            flags: ResourceAdvertisement::flags_for(
                true,
                self.compressed,
                self.total_segments > 1,
                self.has_metadata,
                self.request_id.is_some() && !self.is_response,
                self.request_id.is_some() && self.is_response,
            ),
            hashmap,
        }
    }

    pub fn begin_transfer(&mut self, now: Instant) {
        self.status = ResourceStatus::Transferring;
        self.last_activity = now;
    }

    /// Emits the parts covered by an incoming `REQ`, scanning up to
    /// `COLLISION_GUARD_SIZE` parts for each requested map-hash. A round
    /// where every requested hash was found and sent is a fully-satisfied
    /// round and relaxes the window (§4.3).
    pub fn handle_request(&mut self, req: &ResourceRequest, now: Instant) -> Vec<LinkPacket> {
        let since_last = now.saturating_duration_since(self.last_activity);
        self.last_activity = now;
        let guard = collision_guard_size(self.config.window_max_fast, self.link_mdu);

        let mut packets = Vec::new();
        let mut bytes_sent = 0u64;
        let mut all_found = true;
        for wanted in &req.requested_hashes {
            if let Some(idx) = self
                .parts
                .iter()
                .enumerate()
                .take(guard)
                .find(|(_, p)| &p.map_hash == wanted)
                .map(|(i, _)| i)
            {
                self.outstanding.insert(idx);
                self.parts[idx].acked = true;
                bytes_sent += self.parts[idx].bytes.len() as u64;
                packets.push(LinkPacket::data(PacketContext::Resource, self.parts[idx].bytes.clone()));
            } else {
                all_found = false;
            }
        }
        if all_found && !req.requested_hashes.is_empty() {
            self.note_round_satisfied(bytes_sent, since_last);
        }
        packets
    }

    /// Verifies a `PROOF` against this segment's expected proof and, if it
    /// matches, marks the segment complete.
    pub fn handle_proof(&mut self, proof: &ResourceProof, now: Instant) -> bool {
        if proof.resource_hash != self.hash {
            return false;
        }
        if proof.proof == self.expected_proof {
            self.status = ResourceStatus::Complete;
            self.last_activity = now;
            true
        } else {
            false
        }
    }

    /// Self-initiated cancellation (outgoing ICL).
    pub fn cancel(&mut self) {
        if !self.status.is_terminal() {
            self.status = ResourceStatus::Failed;
        }
    }

    /// An incoming RCL: the receiver rejected the resource outright.
    pub fn reject(&mut self) {
        if !self.status.is_terminal() {
            self.status = ResourceStatus::Rejected;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ResourceStatus::Complete
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn adv_retries(&self) -> u32 {
        self.adv_retries
    }

    pub fn note_adv_retry(&mut self, now: Instant) {
        self.adv_retries += 1;
        self.last_activity = now;
    }

    pub fn note_part_retry(&mut self, now: Instant) {
        self.part_retries += 1;
        self.window.on_retry();
        self.last_activity = now;
    }

    pub fn note_round_satisfied(&mut self, bytes: u64, elapsed: Duration) {
        self.window.update_eifr(bytes, elapsed.as_secs_f64());
        self.window.note_round_satisfied();
    }

    pub fn window(&self) -> &WindowController {
        &self.window
    }

    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout_override
    }

    /// Progress of this segment alone. The sender has no direct signal for
    /// which parts the receiver actually kept, so this counts parts sent at
    /// least once in response to a `REQ` as a proxy — a part only stops
    /// being requested once the receiver has it.
    pub fn segment_progress(&self) -> ResourceProgress {
        let sent = self.parts.iter().filter(|p| p.acked).count();
        ResourceProgress {
            received_bytes: (sent as u64) * self.part_size() as u64,
            total_bytes: self.transfer_size,
            received_parts: sent,
            total_parts: self.parts.len(),
        }
    }

    /// Progress blended across all segments of a chained transfer, per
    /// `original_source/RNS/Resource.py::get_progress`: earlier segments are
    /// fully weighted, the active segment is weighted by its own fraction.
    pub fn blended_progress(&self) -> f64 {
        if self.total_segments <= 1 {
            let seg = self.segment_progress();
            return if seg.total_parts == 0 { 0.0 } else { seg.received_parts as f64 / seg.total_parts as f64 };
        }
        let completed_segments = self.segment_index as f64;
        let seg = self.segment_progress();
        let this_fraction = if seg.total_parts == 0 { 0.0 } else { seg.received_parts as f64 / seg.total_parts as f64 };
        (completed_segments + this_fraction) / self.total_segments as f64
    }

    fn part_size(&self) -> usize {
        self.parts.first().map(|p| p.bytes.len()).unwrap_or(0)
    }
}

fn split_into_segments(data: Vec<u8>) -> Vec<Vec<u8>> {
    if data.is_empty() {
        return vec![Vec::new()];
    }
    data.chunks(MAX_EFFICIENT_SIZE as usize).map(|c| c.to_vec()).collect()
}

fn partition_parts(ciphertext: &[u8], sdu: usize, random_hash: [u8; RANDOM_HASH_SIZE]) -> Vec<Part> {
    ciphertext
        .chunks(sdu)
        .map(|chunk| Part { map_hash: map_hash(chunk, &random_hash), bytes: chunk.to_vec(), acked: false })
        .collect()
}

fn has_map_hash_collision(parts: &[Part]) -> bool {
    let mut seen = HashSet::new();
    parts.iter().any(|p| !seen.insert(p.map_hash))
}
