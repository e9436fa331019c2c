//! The link capability contract (§6, §9 "Dynamic dispatch").
//!
//! Link establishment, key agreement, and addressing are out of scope for
//! this engine — they are modelled here as a small trait the resource state
//! machine is generic over, grounded on the method surface
//! `reticulum-legacy/src/destination/link.rs`'s `Link` exposes to its own
//! resource module (`encrypt`/`decrypt`/`rtt`/`mdu`/registration hooks),
//! without pulling in that file's ed25519/x25519 handshake machinery.

use std::time::Duration;

use crate::error::ParcelError;
use crate::hash::Hash;
use crate::packet::LinkPacket;

/// Everything the resource engine needs from its underlying point-to-point
/// link. Implementors own the actual transport, encryption keys, and
/// handshake state; none of that is visible here.
pub trait Link {
    /// Maximum data unit available for a resource part, before the
    /// engine subtracts header/IFAC overhead to derive `SDU`.
    fn mdu(&self) -> usize;

    /// Current round-trip-time estimate.
    fn rtt(&self) -> Duration;

    /// Multiplier applied to `rtt` to get a base timeout.
    fn traffic_timeout_factor(&self) -> f64;

    /// Rough cost (bytes) of establishing this link, used as an EIFR
    /// fallback before any real throughput sample exists.
    fn establishment_cost(&self) -> usize;

    /// Opaque stream encryption over the already-salted plaintext.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ParcelError>;

    /// Inverse of `encrypt`.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ParcelError>;

    /// Emits a packet on the link. Errors here are `Transient` at the
    /// resource level: the caller cancels on failure.
    fn send(&self, packet: LinkPacket) -> Result<(), ParcelError>;

    /// Backpressure gate: the sender polls this before transmitting the
    /// advertisement and blocks (at 250ms per the concurrency model)
    /// until it returns `true`.
    fn ready_for_new_resource(&self) -> bool;

    /// Window/EIFR hints carried over from the link's previous resource
    /// transfer, if any — lets a new resource start warm.
    fn last_resource_window(&self) -> Option<usize>;
    fn last_resource_eifr(&self) -> Option<f64>;
    fn record_resource_window(&self, window: usize);
    fn record_resource_eifr(&self, eifr: f64);

    fn has_incoming_resource(&self, hash: Hash) -> bool;
    fn register_incoming_resource(&self, hash: Hash);
    fn register_outgoing_resource(&self, hash: Hash);
    fn resource_concluded(&self, hash: Hash);
    fn cancel_incoming_resource(&self, hash: Hash);
    fn cancel_outgoing_resource(&self, hash: Hash);

    /// Consults the transport's packet cache for a previously observed
    /// proof matching `hash`, used by the AWAITING_PROOF watchdog branch
    /// to recover from a proof packet lost in transit.
    fn cached_proof(&self, hash: Hash) -> Option<Vec<u8>>;

    /// Caches an emitted proof so late sender retransmits can be answered
    /// without the receiver re-deriving it.
    fn cache_proof(&self, hash: Hash, proof: Vec<u8>);
}
