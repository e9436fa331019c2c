//! The engine's public entry point (§6 "Exposed to user"): tracks every
//! outgoing and incoming resource on a link, dispatches inbound packets to
//! the right sender/receiver, drives the watchdog, and surfaces progress
//! and completion as drained events. Grounded on
//! `styrene-rns-transport/src/resource/manager.rs`'s registry-plus-dispatch
//! shape.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::advertisement::ResourceAdvertisement;
use crate::config::ResourceConfig;
use crate::error::ParcelError;
use crate::hash::Hash;
use crate::link::Link;
use crate::packet::{LinkPacket, PacketContext};
use crate::resource::receiver::ResourceReceiver;
use crate::resource::sender::ResourceSender;
use crate::resource::watchdog::{self, ReceiverAction, SenderAction};
use crate::resource::{
    ResourceEvent, ResourceEventKind, ResourcePayload, ResourceProgress, ResourceStatus, METADATA_MAX_SIZE,
};
use crate::wire::{ResourceHashUpdate, ResourceProof, ResourceRequest};

type CompletionCallback = Box<dyn FnOnce(ResourceStatus, Option<ResourcePayload>) + Send>;
type ProgressCallback = Box<dyn FnMut(ResourceProgress) + Send>;

/// The complete metadata+data frame the sender packs once, before
/// segmentation, and the receiver only unpacks once every chained segment's
/// plaintext chunk has been collected, in order. Mirrors the frame each of
/// `sender.rs`/`receiver.rs` builds/consumes for a single segment.
#[derive(Debug, Serialize, Deserialize)]
struct PayloadFrame {
    #[serde(with = "serde_bytes")]
    metadata: Vec<u8>,
    #[serde(with = "serde_bytes")]
    data: Vec<u8>,
}

/// Registry of in-flight resources on one link, plus the drained event
/// queue user code polls for completions and progress.
pub struct ResourceManager {
    config: ResourceConfig,
    outgoing: HashMap<Hash, ResourceSender>,
    incoming: HashMap<Hash, ResourceReceiver>,
    events: Vec<ResourceEvent>,
    /// Plaintext chunks collected so far for a chained transfer, keyed by
    /// `original_hash`, in segment order.
    segment_buffers: HashMap<Hash, Vec<u8>>,
    /// Outgoing completion/progress callbacks, keyed by `original_hash` so
    /// they survive across a chained transfer's segments.
    callbacks: HashMap<Hash, CompletionCallback>,
    progress_callbacks: HashMap<Hash, ProgressCallback>,
}

impl ResourceManager {
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            config,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            events: Vec::new(),
            segment_buffers: HashMap::new(),
            callbacks: HashMap::new(),
            progress_callbacks: HashMap::new(),
        }
    }

    /// Begins sending `data` (with optional `metadata`) over `link`,
    /// returning the resource hash the caller can track.
    ///
    /// `advertise` controls whether the advertisement is sent immediately
    /// (leaving the resource `Queued` otherwise, until `advertise_outgoing`
    /// is called); `auto_compress` gates per-segment compression;
    /// `timeout`, if set, overrides the link-RTT-derived advertisement
    /// timeout for this resource (not inherited by chained next-segments).
    #[allow(clippy::too_many_arguments)]
    pub fn start_send(
        &mut self,
        link: &dyn Link,
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
        request_id: Option<Vec<u8>>,
        is_response: bool,
        auto_compress: bool,
        advertise: bool,
        timeout: Option<Duration>,
        callback: Option<CompletionCallback>,
        progress_callback: Option<ProgressCallback>,
        now: Instant,
    ) -> Result<Hash, ParcelError> {
        if !link.ready_for_new_resource() {
            return Err(ParcelError::Transient("link not ready for a new resource".into()));
        }

        let mut sender =
            ResourceSender::new(data, metadata, link, self.config, request_id, is_response, auto_compress, timeout, now)?;
        let hash = sender.hash;
        let original_hash = sender.original_hash;
        link.register_outgoing_resource(hash);

        if let Some(cb) = callback {
            self.callbacks.insert(original_hash, cb);
        }
        if let Some(pcb) = progress_callback {
            self.progress_callbacks.insert(original_hash, pcb);
        }

        if advertise {
            let adv = sender.advertisement();
            sender.status = ResourceStatus::Advertised;
            link.send(LinkPacket::data(PacketContext::ResourceAdvertisement, adv.pack()?))?;
            log::debug!("advertised outgoing resource {hash} ({} parts)", adv.parts);
        }
        self.outgoing.insert(hash, sender);
        Ok(hash)
    }

    /// Sends the advertisement for a resource started with `advertise:
    /// false`, transitioning it from `Queued` to `Advertised`.
    pub fn advertise_outgoing(&mut self, hash: Hash, link: &dyn Link) -> Result<(), ParcelError> {
        if let Some(sender) = self.outgoing.get_mut(&hash) {
            let adv = sender.advertisement();
            sender.status = ResourceStatus::Advertised;
            link.send(LinkPacket::data(PacketContext::ResourceAdvertisement, adv.pack()?))?;
            log::debug!("advertised outgoing resource {hash} ({} parts)", adv.parts);
        }
        Ok(())
    }

    /// Registers an incoming advertisement. Rejects immediately (by simply
    /// not registering and leaving it to the caller to send an RCL) if the
    /// link's backpressure gate refuses it.
    pub fn accept_advertisement(&mut self, adv: &ResourceAdvertisement, link: &dyn Link, now: Instant) -> Hash {
        let receiver = ResourceReceiver::accept(adv, self.config, now);
        let hash = receiver.hash;
        link.register_incoming_resource(hash);
        self.incoming.insert(hash, receiver);
        hash
    }

    /// Dispatches one inbound link packet to the matching sender or
    /// receiver, emitting link packets the caller must transmit.
    pub fn handle_packet(&mut self, packet: &LinkPacket, link: &dyn Link, now: Instant) -> Result<Vec<LinkPacket>, ParcelError> {
        match packet.context {
            PacketContext::ResourceAdvertisement => {
                let adv = ResourceAdvertisement::unpack(&packet.payload)?;
                let hash = self.accept_advertisement(&adv, link, now);
                // A receiver requests its first window's worth of parts as
                // soon as it accepts the advertisement, rather than waiting
                // for the watchdog's retry timeout to elapse.
                let recv = self.incoming.get_mut(&hash).expect("just inserted");
                let req = recv.build_request(now);
                Ok(vec![LinkPacket::data(PacketContext::ResourceRequest, req.encode())])
            }
            PacketContext::ResourceRequest => {
                let req = ResourceRequest::decode(&packet.payload)?;
                if let Some(sender) = self.outgoing.get_mut(&req.resource_hash) {
                    sender.begin_transfer(now);
                    Ok(sender.handle_request(&req, now))
                } else {
                    Ok(Vec::new())
                }
            }
            PacketContext::Resource => {
                self.handle_incoming_part(&packet.payload, link, now)
            }
            PacketContext::ResourceHashUpdate => {
                let hmu = ResourceHashUpdate::decode(&packet.payload)?;
                if let Some(recv) = self.incoming.get_mut(&hmu.resource_hash) {
                    recv.apply_hash_update(&hmu, link.mdu(), now);
                }
                Ok(Vec::new())
            }
            PacketContext::ResourceProof => {
                let proof = ResourceProof::decode(&packet.payload)?;
                self.handle_proof(&proof, link, now);
                Ok(Vec::new())
            }
            PacketContext::ResourceInitiatorCancel => {
                let hash = crate::wire::decode_cancel(&packet.payload)?;
                if let Some(recv) = self.incoming.get_mut(&hash) {
                    recv.cancel();
                    self.events.push(ResourceEvent { hash, kind: ResourceEventKind::Cancelled });
                }
                Ok(Vec::new())
            }
            PacketContext::ResourceReceiverCancel => {
                let hash = crate::wire::decode_cancel(&packet.payload)?;
                if let Some(sender) = self.outgoing.get_mut(&hash) {
                    sender.reject();
                    let original_hash = sender.original_hash;
                    if let Some(cb) = self.callbacks.remove(&original_hash) {
                        cb(ResourceStatus::Rejected, None);
                    }
                    self.events.push(ResourceEvent { hash, kind: ResourceEventKind::Rejected });
                }
                Ok(Vec::new())
            }
        }
    }

    fn handle_incoming_part(&mut self, payload: &[u8], link: &dyn Link, now: Instant) -> Result<Vec<LinkPacket>, ParcelError> {
        let mut matched = None;
        for (hash, recv) in self.incoming.iter_mut() {
            if recv.handle_part(payload, now) {
                matched = Some(*hash);
                break;
            }
        }
        let Some(hash) = matched else { return Ok(Vec::new()) };

        let recv = self.incoming.get_mut(&hash).expect("just matched");
        if !recv.is_fully_received() {
            return Ok(Vec::new());
        }

        let (proof, chunk) = recv.assemble(link)?;
        let original_hash = recv.original_hash;
        let segment_index = recv.segment_index;
        let total_segments = recv.total_segments;

        // A segment's plaintext is only a byte-range of the whole
        // metadata+data frame (see `PayloadFrame` above): buffer it by
        // `original_hash` and only unframe once the last chained segment's
        // chunk has arrived.
        self.segment_buffers.entry(original_hash).or_default().extend_from_slice(&chunk);
        if segment_index + 1 == total_segments {
            let full = self.segment_buffers.remove(&original_hash).unwrap_or_default();
            let frame: PayloadFrame = rmp_serde::from_slice(&full)
                .map_err(|e| ParcelError::Codec(format!("payload frame decode failed: {e}")))?;
            if frame.metadata.len() > METADATA_MAX_SIZE {
                return Err(ParcelError::LimitExceeded("metadata exceeds METADATA_MAX_SIZE".into()));
            }
            let metadata = if frame.metadata.is_empty() { None } else { Some(frame.metadata) };
            self.events.push(ResourceEvent {
                hash: original_hash,
                kind: ResourceEventKind::Complete(ResourcePayload { data: frame.data, metadata }),
            });
        }

        let wire_proof = ResourceProof { resource_hash: hash, proof };
        link.cache_proof(hash, wire_proof.encode());
        Ok(vec![LinkPacket::proof(PacketContext::ResourceProof, wire_proof.encode())])
    }

    fn handle_proof(&mut self, proof: &ResourceProof, link: &dyn Link, now: Instant) {
        if let Some(sender) = self.outgoing.get_mut(&proof.resource_hash) {
            if sender.handle_proof(proof, now) {
                link.resource_concluded(proof.resource_hash);
                link.record_resource_window(sender.window().window());
                link.record_resource_eifr(sender.window().eifr());

                sender.prepare_next_segment(link, now).ok();
                if let Some(mut next) = sender.take_next_segment() {
                    let next_hash = next.hash;
                    let adv = next.advertisement();
                    next.status = ResourceStatus::Advertised;
                    if link.send(LinkPacket::data(PacketContext::ResourceAdvertisement, adv.pack().unwrap_or_default())).is_ok() {
                        self.outgoing.insert(next_hash, *next);
                    }
                } else {
                    let original_hash = sender.original_hash;
                    if let Some(cb) = self.callbacks.remove(&original_hash) {
                        cb(ResourceStatus::Complete, None);
                    }
                    self.progress_callbacks.remove(&original_hash);
                    self.events.push(ResourceEvent { hash: proof.resource_hash, kind: ResourceEventKind::OutboundComplete });
                }
            }
        }
    }

    /// Requests the engine stop an outgoing resource early.
    pub fn cancel_outgoing(&mut self, hash: Hash, link: &dyn Link) -> Result<(), ParcelError> {
        if let Some(sender) = self.outgoing.get_mut(&hash) {
            log::info!("cancelling outgoing resource {hash}");
            sender.cancel();
            let original_hash = sender.original_hash;
            if let Some(cb) = self.callbacks.remove(&original_hash) {
                cb(ResourceStatus::Failed, None);
            }
            self.progress_callbacks.remove(&original_hash);
            link.cancel_outgoing_resource(hash);
            link.send(LinkPacket::data(PacketContext::ResourceInitiatorCancel, crate::wire::encode_cancel(hash)))?;
        }
        Ok(())
    }

    pub fn reject_incoming(&mut self, hash: Hash, link: &dyn Link) -> Result<(), ParcelError> {
        if let Some(recv) = self.incoming.get_mut(&hash) {
            log::info!("rejecting incoming resource {hash}");
            recv.reject();
            link.cancel_incoming_resource(hash);
            link.send(LinkPacket::data(PacketContext::ResourceReceiverCancel, crate::wire::encode_cancel(hash)))?;
            self.events.push(ResourceEvent { hash, kind: ResourceEventKind::Rejected });
        }
        Ok(())
    }

    /// One watchdog pass over every tracked resource; returns the link
    /// packets that need (re)transmitting as a result.
    pub fn tick(&mut self, link: &dyn Link, now: Instant) -> Vec<LinkPacket> {
        let mut out = Vec::new();

        for (hash, sender) in self.outgoing.iter_mut() {
            match watchdog::tick_sender(sender, &self.config, link, now) {
                SenderAction::ResendAdvertisement => {
                    log::debug!("resending advertisement for {hash}");
                    if let Ok(bytes) = sender.advertisement().pack() {
                        out.push(LinkPacket::data(PacketContext::ResourceAdvertisement, bytes));
                    }
                }
                SenderAction::GiveUp => {
                    log::warn!("giving up on outgoing resource {hash} after exhausting advertisement retries");
                    let original_hash = sender.original_hash;
                    if let Some(cb) = self.callbacks.remove(&original_hash) {
                        cb(ResourceStatus::Failed, None);
                    }
                    self.progress_callbacks.remove(&original_hash);
                    self.events.push(ResourceEvent { hash: *hash, kind: ResourceEventKind::Cancelled });
                }
                SenderAction::None => {}
            }
            if let Some(pcb) = self.progress_callbacks.get_mut(&sender.original_hash) {
                pcb(sender.segment_progress());
            }
        }
        self.outgoing.retain(|_, s| !s.status.is_terminal());

        for (hash, recv) in self.incoming.iter_mut() {
            match watchdog::tick_receiver(recv, &self.config, link, now) {
                ReceiverAction::ResendRequest => {
                    log::debug!("retrying request for incoming resource {hash} (attempt {})", recv.retries());
                    let req = recv.build_request(now);
                    out.push(LinkPacket::data(PacketContext::ResourceRequest, req.encode()));
                }
                ReceiverAction::CheckCachedProof => {
                    if let Some(bytes) = link.cached_proof(*hash) {
                        out.push(LinkPacket::proof(PacketContext::ResourceProof, bytes));
                    }
                }
                ReceiverAction::GiveUp => {
                    log::warn!("incoming resource {hash} timed out after exhausting retries");
                    self.events.push(ResourceEvent { hash: *hash, kind: ResourceEventKind::Corrupt });
                }
                ReceiverAction::None => {}
            }
        }
        self.incoming.retain(|_, r| !r.status.is_terminal());

        out
    }

    pub fn drain_events(&mut self) -> Vec<ResourceEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn outgoing_status(&self, hash: Hash) -> Option<ResourceStatus> {
        self.outgoing.get(&hash).map(|s| s.status)
    }

    pub fn incoming_status(&self, hash: Hash) -> Option<ResourceStatus> {
        self.incoming.get(&hash).map(|r| r.status)
    }
}
