use std::collections::VecDeque;
use std::fmt;

use crate::delivery::{DeliveryDisposition, DeliveryId};
use crate::hash::AddressKey;
use crate::mask::MaskBit;
use crate::protocol::ProtocolLink;

/// Opaque per-link identifier minted by the core on link open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Endpoint,
    Router,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Incoming,
    Outgoing,
}

/// A message as it travels through FIFOs: the resolved `to` address kept
/// for logging/tests, the composed delivery-annotations (§4.6), and an
/// opaque body the protocol layer wrote and will write again on egress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    pub to: String,
    pub trace: Vec<String>,
    pub ingress: Option<String>,
    pub body: Vec<u8>,
}

/// A tagged routed event queued on a link's `msg_fifo` or `event_fifo`.
#[derive(Debug, Clone)]
pub enum RoutedEvent {
    /// `msg_fifo` entry: a message copy, with the ingress delivery attached
    /// only for the first fan-out target of an unsettled ingress delivery.
    Message { message: RoutedMessage, delivery: Option<DeliveryId> },
    /// `event_fifo` entry: a disposition/settle notification destined for
    /// `delivery`'s peer.
    Status { delivery: DeliveryId, disposition: Option<DeliveryDisposition>, settle: bool },
}

/// An open link and its two FIFOs. `mask_bit` is nonzero only for
/// router-typed links; `connected_link` is set only for link-routed pairs
/// (§4.3 step 4); `owning_addr` is set only for outgoing endpoint links.
/// `protocol` is the live handle the router calls back into to activate
/// the link — the router owns the bookkeeping record, the protocol layer
/// still owns the socket behind it.
pub struct LinkRecord {
    pub id: LinkId,
    pub link_type: LinkType,
    pub direction: LinkDirection,
    pub mask_bit: MaskBit,
    pub owning_addr: Option<AddressKey>,
    pub connected_link: Option<LinkId>,
    pub peer_link: Option<LinkId>,
    pub msg_fifo: VecDeque<RoutedEvent>,
    pub event_fifo: VecDeque<RoutedEvent>,
    pub drain_mode: bool,
    pub protocol: Box<dyn ProtocolLink + Send>,
}

impl fmt::Debug for LinkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkRecord")
            .field("id", &self.id)
            .field("link_type", &self.link_type)
            .field("direction", &self.direction)
            .field("mask_bit", &self.mask_bit)
            .field("msg_fifo_len", &self.msg_fifo.len())
            .field("event_fifo_len", &self.event_fifo.len())
            .finish()
    }
}

impl LinkRecord {
    pub fn new(
        id: LinkId,
        link_type: LinkType,
        direction: LinkDirection,
        protocol: Box<dyn ProtocolLink + Send>,
    ) -> Self {
        Self {
            id,
            link_type,
            direction,
            mask_bit: 0,
            owning_addr: None,
            connected_link: None,
            peer_link: None,
            msg_fifo: VecDeque::new(),
            event_fifo: VecDeque::new(),
            drain_mode: false,
            protocol,
        }
    }

    pub fn is_router_link(&self) -> bool {
        self.link_type == LinkType::Router
    }
}
