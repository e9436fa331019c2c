//! The minimal packet envelope the resource engine emits onto its link.
//!
//! Real transports carry far more (addressing, IFAC, propagation hops —
//! see `original_source/RNS/Resource.py`'s use of `RNS.Packet`), but all of
//! that is the out-of-scope transport collaborator. The resource engine only
//! needs a context tag, a packet type (data vs. proof), and a payload.

/// One-byte context tag carried on every resource-related link packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketContext {
    /// A raw resource part.
    Resource,
    ResourceAdvertisement,
    ResourceRequest,
    ResourceHashUpdate,
    ResourceProof,
    /// Initiator cancel.
    ResourceInitiatorCancel,
    /// Receiver reject.
    ResourceReceiverCancel,
}

impl From<PacketContext> for u8 {
    fn from(ctx: PacketContext) -> u8 {
        match ctx {
            PacketContext::Resource => 0x01,
            PacketContext::ResourceAdvertisement => 0x02,
            PacketContext::ResourceRequest => 0x03,
            PacketContext::ResourceHashUpdate => 0x04,
            PacketContext::ResourceProof => 0x05,
            PacketContext::ResourceInitiatorCancel => 0x06,
            PacketContext::ResourceReceiverCancel => 0x07,
        }
    }
}

impl TryFrom<u8> for PacketContext {
    type Error = crate::error::ParcelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => PacketContext::Resource,
            0x02 => PacketContext::ResourceAdvertisement,
            0x03 => PacketContext::ResourceRequest,
            0x04 => PacketContext::ResourceHashUpdate,
            0x05 => PacketContext::ResourceProof,
            0x06 => PacketContext::ResourceInitiatorCancel,
            0x07 => PacketContext::ResourceReceiverCancel,
            other => {
                return Err(crate::error::ParcelError::Codec(format!(
                    "unknown packet context {other:#04x}"
                )))
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data,
    Proof,
}

/// A packet as handed to / received from the link collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkPacket {
    pub context: PacketContext,
    pub packet_type: PacketType,
    pub payload: Vec<u8>,
}

impl LinkPacket {
    pub fn data(context: PacketContext, payload: Vec<u8>) -> Self {
        Self { context, packet_type: PacketType::Data, payload }
    }

    pub fn proof(context: PacketContext, payload: Vec<u8>) -> Self {
        Self { context, packet_type: PacketType::Proof, payload }
    }
}
