/// Opaque identifier for an AMQP delivery, minted by the protocol layer.
/// The core never looks inside it; it only threads it through FIFOs and
/// peering lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryId(pub u64);

/// Disposition codes the egress scheduler and disposition bridge exchange.
/// Mirrors the AMQP terminal/non-terminal outcome set used by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDisposition {
    Accepted,
    Released,
    Rejected,
    Modified,
}

/// Final outcome applied to an *ingress* delivery once the routing decision
/// for it is known (§4.3 step 10, §7's error table). Not an error: these are
/// the three ordinary terminal outcomes of a successful `rx` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// An in-process handler captured the message.
    Accepted,
    /// No address record, or the address resolved but had no rlinks/rnodes.
    Released,
    /// The message failed properties validation.
    Rejected,
    /// Fan-out occurred and the ingress delivery was not settled at the
    /// source: it stays alive, peered to the first routed event.
    LeftOpen,
    /// The ingress delivery was settled at the source; settled deliveries
    /// are never peered, so it is freed immediately regardless of fan-out.
    FreedSettled,
}

/// The settle/disposition/peer surface the core needs from a concrete
/// delivery object. Implemented by the (out-of-scope) protocol library;
/// see [`crate::protocol`].
pub trait Delivery {
    fn id(&self) -> DeliveryId;
    fn disposition(&self) -> Option<DeliveryDisposition>;
    fn settled(&self) -> bool;
    fn peer(&self) -> Option<DeliveryId>;

    fn set_peer(&mut self, peer: Option<DeliveryId>);
    fn update_disposition(&mut self, disposition: DeliveryDisposition);
    fn settle(&mut self);
}

/// Peers two deliveries so their dispositions and settlements mirror each
/// other (§4.4 step 3, §8 invariant 5: `d1.peer = d2 ∧ d2.peer = d1`).
pub fn peer_deliveries<A: Delivery, B: Delivery>(a: &mut A, b: &mut B) {
    a.set_peer(Some(b.id()));
    b.set_peer(Some(a.id()));
}
