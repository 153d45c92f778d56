//! The seam between this crate and the out-of-scope AMQP connection
//! library. Grounded in `EmbeddedLinkAdapter`: a small trait boundary that
//! isolates the routing/resource logic in the teacher crate from a
//! concrete transport medium, played here by a concrete protocol/connection
//! library the core never implements.

/// Terminus capabilities observed at link-open time (§4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminusCaps {
    /// The `ROUTER` capability symbol was present.
    pub is_router: bool,
    /// The remote source/target is marked dynamic.
    pub is_dynamic: bool,
    /// The remote source address, if any was set.
    pub source_address: Option<String>,
    /// True if the underlying connection is an inter-router connection
    /// (established between two router nodes, as opposed to a router and
    /// an endpoint).
    pub is_inter_router_connection: bool,
}

/// Link activation, credit/flow, and back-pressure-reporting primitives the
/// egress scheduler and link-lifecycle code need from a live link.
pub trait ProtocolLink {
    /// Wakes the protocol layer so it calls back into `on_writable` (or
    /// equivalent) for this link.
    fn activate(&mut self);

    /// Current AMQP credit available to the sender.
    fn credit(&self) -> u32;

    /// Issues `delta` units of credit to the peer (used by the ingress
    /// path's "advance and flow(+1)" step, and by link-open's initial
    /// grant).
    fn flow(&mut self, delta: u32);

    /// Reports the sender has `count` messages offered but unsent.
    fn offered(&mut self, count: usize);

    /// Reports the sender's queue has drained to zero.
    fn drained(&mut self);

    /// Reports whether the receiver-driven drain-mode flag has changed
    /// since the last call, alongside its current value (mirrors
    /// `qd_link_drain_changed`). Drain mode is requested by the remote
    /// receiver via flow frames; the scheduler only observes it here, it
    /// never sets it.
    fn drain_changed(&mut self) -> (bool, bool);

    fn terminus_caps(&self) -> TerminusCaps;

    fn set_source_address(&mut self, address: String);
}

/// The minimal parsed view of an inbound message the ingress pipeline
/// needs: the `to` field and the delivery-annotations map, read only
/// through the properties section (§1's scope boundary).
pub trait IncomingMessage {
    /// `None` means the properties section failed to parse.
    fn to(&self) -> Option<&str>;
    fn trace(&self) -> &[String];
    fn ingress(&self) -> Option<&str>;
    fn body(&self) -> &[u8];
}
