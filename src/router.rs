use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, error, info, trace, warn};

use crate::address::{AddressHandler, AddressTable};
use crate::annotate::annotate;
use crate::config::RouterConfig;
use crate::delivery::{DeliveryDisposition, DeliveryId, DeliveryOutcome};
use crate::error::RouterError;
use crate::hash::{resolve_address, AddressKey};
use crate::link::{LinkDirection, LinkId, LinkRecord, LinkType, RoutedEvent, RoutedMessage};
use crate::mask::{LinkSet, MaskBit, MaskBitSet, OriginMask};
use crate::node::{RouterNodeRecord, RouterNodeTable};
use crate::protocol::{IncomingMessage, ProtocolLink, TerminusCaps};
use crate::temp_addr::generate_temp_address;

/// Identifies a connection (a pair of sockets to one peer) for the purpose
/// of sharing one mask-bit between an inter-router connection's incoming
/// and outgoing router-typed links (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// Fixed internal link names used for a router-initiated connection pair
/// (§6).
pub const QD_INTERNODE_LINK_NAME_1: &str = "qdrouter.internode.1"; // incoming
pub const QD_INTERNODE_LINK_NAME_2: &str = "qdrouter.internode.2"; // outgoing

/// The inter-router capability symbol placed in terminus capabilities (§6).
pub const ROUTER_CAPABILITY: &str = "ROUTER";

/// Outcome of an `on_rx` call: the disposition the caller must apply to the
/// live ingress delivery object, plus any links the caller must activate
/// now that the lock has been released.
#[derive(Debug, Clone)]
pub struct RxResult {
    pub outcome: DeliveryOutcome,
    pub activate: Vec<LinkId>,
}

/// One message ready to leave a link, produced by `on_writable`. `tag` is
/// the delivery tag to mint for the new outgoing delivery; `peer_with`, if
/// set, is the ingress delivery that must be peered with it (§4.4 step 3).
#[derive(Debug, Clone)]
pub struct EgressSend {
    pub message: RoutedMessage,
    pub tag: u64,
    pub peer_with: Option<DeliveryId>,
}

/// One disposition/settle action to apply to an already-live delivery,
/// produced by `on_writable` draining `event_fifo` (§4.4 step 4).
#[derive(Debug, Clone)]
pub struct StatusAction {
    pub delivery: DeliveryId,
    pub disposition: Option<DeliveryDisposition>,
    pub settle: bool,
}

/// Result of a writable callback: everything the caller must do to finish
/// draining this link for one turn.
#[derive(Debug, Clone, Default)]
pub struct EgressReport {
    pub to_send: Vec<EgressSend>,
    pub status_actions: Vec<StatusAction>,
    pub offer: usize,
    pub report_offered: bool,
    pub report_drained: bool,
    pub drain_flip: bool,
}

impl EgressReport {
    /// The "number of events performed" §4.4's contract says `on_writable`
    /// reports back to the protocol layer: one per message sent, one per
    /// status action applied, plus one more if drain-mode just flipped to
    /// true (so the host flushes a drain-response flow frame).
    pub fn event_count(&self) -> usize {
        self.to_send.len() + self.status_actions.len() + usize::from(self.drain_flip)
    }
}

/// Result of an `on_disposition` call.
#[derive(Debug, Clone, Default)]
pub struct DispositionResult {
    pub activate: Vec<LinkId>,
    pub free_this_delivery: bool,
}

/// Result of opening an outgoing link: the link id, the source address to
/// report back to the remote peer if one was synthesized, and whether the
/// topology layer must be told a new mobile address appeared.
#[derive(Debug, Clone)]
pub struct OutgoingLinkResult {
    pub link_id: LinkId,
    pub synthesized_source: Option<String>,
    pub notify_mobile_added: Option<String>,
}

/// Result of detaching a link: the mobile address key to notify the
/// topology layer about, if the last local subscriber just vanished.
#[derive(Debug, Clone, Default)]
pub struct DetachResult {
    pub notify_mobile_removed: Option<String>,
}

struct RouterInner {
    addresses: AddressTable,
    nodes: RouterNodeTable,
    links: HashMap<LinkId, LinkRecord>,
    out_links_by_mask_bit: Vec<Option<LinkId>>,
    neighbor_free_mask: MaskBitSet,
    connection_mask_bits: HashMap<ConnectionId, MaskBit>,
    next_link_id: u64,
    dtag: u64,
    hello_addr: Option<AddressKey>,
    router_addr: Option<AddressKey>,
}

impl RouterInner {
    fn new(config: &RouterConfig) -> Self {
        let width = config.mask_table_width;
        let mut inner = Self {
            addresses: AddressTable::new(),
            nodes: RouterNodeTable::new(),
            links: HashMap::new(),
            out_links_by_mask_bit: (0..width).map(|_| None).collect(),
            neighbor_free_mask: MaskBitSet::new(width),
            connection_mask_bits: HashMap::new(),
            next_link_id: 1,
            dtag: 1,
            hello_addr: None,
            router_addr: None,
        };

        if config.mode == crate::config::RouterMode::Interior {
            let hello = AddressKey::local("qdhello");
            let router_addr = AddressKey::local("qdrouter");
            inner.addresses.get_or_insert(hello.clone());
            inner.addresses.get_or_insert(router_addr.clone());
            inner.hello_addr = Some(hello);
            inner.router_addr = Some(router_addr);
        }

        inner
    }

    fn mint_link_id(&mut self) -> LinkId {
        let id = LinkId::new(self.next_link_id);
        self.next_link_id += 1;
        id
    }

    /// Allocates a mask-bit for `connection`, sharing it across both
    /// directions of the same inter-router connection (§4.1).
    fn mask_bit_for_connection(&mut self, connection: ConnectionId) -> Result<MaskBit, RouterError> {
        if let Some(bit) = self.connection_mask_bits.get(&connection) {
            return Ok(*bit);
        }
        let bit = self.neighbor_free_mask.first_set().ok_or_else(|| {
            error!("exceeded maximum inter-router link count");
            RouterError::MaskBitsExhausted
        })?;
        self.connection_mask_bits.insert(connection, bit);
        Ok(bit)
    }

    fn release_mask_bit(&mut self, connection: ConnectionId, bit: MaskBit) {
        self.connection_mask_bits.remove(&connection);
        self.neighbor_free_mask.set_bit(bit);
    }

    /// §4.8 `check_addr`, minus the post-lock notification (the caller
    /// performs that once the lock is released). `was_local` mirrors the
    /// original's own parameter: true iff the caller just removed this
    /// address's last local linkage (an `rlinks` entry). By the time this
    /// runs, the caller has already mutated `rlinks`, so "no more locals"
    /// must come from the caller's own knowledge of what it just did, not
    /// from comparing two reads of the same already-mutated state.
    ///
    /// Deletion and the "notify no more locals" outcome are independent:
    /// the original captures the hash key on deletion too, so an address
    /// that is both eligible for deletion *and* just lost its last local
    /// subscriber still reports the key for `mobile_removed` notification.
    fn check_addr(&mut self, key: &AddressKey, was_local: bool) -> Option<String> {
        let record = self.addresses.retrieve(key)?;
        let no_more_locals = was_local && record.rlinks.is_empty();

        if record.is_eligible_for_deletion() {
            self.addresses.remove(key);
        }

        if no_more_locals {
            Some(key.to_string())
        } else {
            None
        }
    }
}

/// The router-wide lock guards every table named in §5: address table,
/// router-node table, link registry, mask-bit bitmap, link FIFOs,
/// counters, and the delivery-tag counter. No handler holds it across a
/// suspension point — see DESIGN.md for why this is `std::sync::Mutex`
/// rather than `tokio::sync::Mutex`.
pub struct RouterCore {
    config: RouterConfig,
    inner: Mutex<RouterInner>,
}

impl RouterCore {
    pub fn new(config: RouterConfig) -> Self {
        let inner = RouterInner::new(&config);
        Self { config, inner: Mutex::new(inner) }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RouterInner> {
        self.inner.lock().expect("router lock poisoned")
    }

    // ---- 4.7 Link lifecycle -------------------------------------------

    pub fn on_incoming_link(
        &self,
        connection: ConnectionId,
        caps: &TerminusCaps,
        protocol: Box<dyn ProtocolLink + Send>,
    ) -> Result<LinkId, RouterError> {
        if caps.is_router && !caps.is_inter_router_connection {
            warn!("router capability on a non-inter-router connection, closing link");
            return Err(RouterError::NonRouterConnection);
        }

        let mut inner = self.lock();
        let id = inner.mint_link_id();
        let mut record = LinkRecord::new(id, LinkType::Endpoint, LinkDirection::Incoming, protocol);

        if caps.is_router {
            record.link_type = LinkType::Router;
            record.mask_bit = inner.mask_bit_for_connection(connection)?;
        }

        record.protocol.flow(self.config.initial_credit);
        inner.links.insert(id, record);
        info!("incoming link {} opened (router={})", id.value(), caps.is_router);
        Ok(id)
    }

    pub fn on_outgoing_link(
        &self,
        connection: ConnectionId,
        caps: &TerminusCaps,
        mut protocol: Box<dyn ProtocolLink + Send>,
    ) -> Result<OutgoingLinkResult, RouterError> {
        let mut inner = self.lock();
        let id = inner.mint_link_id();

        if caps.is_router {
            let mask_bit = inner.mask_bit_for_connection(connection)?;
            let mut record = LinkRecord::new(id, LinkType::Router, LinkDirection::Outgoing, protocol);
            record.mask_bit = mask_bit;
            record.owning_addr = inner.hello_addr.clone();
            if let Some(hello) = inner.hello_addr.clone() {
                inner.addresses.get_or_insert(hello).add_rlink(id);
            }
            if (mask_bit as usize) < inner.out_links_by_mask_bit.len() {
                inner.out_links_by_mask_bit[mask_bit as usize] = Some(id);
            }
            inner.links.insert(id, record);
            return Ok(OutgoingLinkResult { link_id: id, synthesized_source: None, notify_mobile_added: None });
        }

        let (key, synthesized_source, propagate) = match &caps.source_address {
            Some(source) => {
                let resolved = resolve_address(source, &self.config.area, &self.config.router_id);
                if resolved.key.class() != crate::hash::AddressClass::Mobile {
                    warn!("outgoing endpoint link source '{source}' is not mobile-class, closing link");
                    return Err(RouterError::NonMobileSource);
                }
                (resolved.key, None, true)
            }
            None => {
                if !caps.is_dynamic {
                    debug!("outgoing endpoint link with no source and not dynamic, closing link silently");
                    return Err(RouterError::MissingDynamicSource);
                }
                let synthesized = generate_temp_address(&self.config.area, &self.config.router_id);
                let resolved = resolve_address(&synthesized, &self.config.area, &self.config.router_id);
                (resolved.key, Some(synthesized), false)
            }
        };

        let record = LinkRecord::new(id, LinkType::Endpoint, LinkDirection::Outgoing, protocol);
        inner.links.insert(id, record);
        if let Some(link) = inner.links.get_mut(&id) {
            link.owning_addr = Some(key.clone());
        }

        let address = inner.addresses.get_or_insert(key.clone());
        let is_first_subscriber = address.rlinks.is_empty();
        address.add_rlink(id);

        let notify_mobile_added =
            if propagate && is_first_subscriber { Some(key.to_string()) } else { None };

        drop(inner);
        if let Some(source) = &synthesized_source {
            protocol_set_source(&self.inner, id, source);
        }

        Ok(OutgoingLinkResult { link_id: id, synthesized_source, notify_mobile_added })
    }

    /// We initiate an inter-router connection: allocate one shared
    /// mask-bit and open a router-capability-tagged incoming/outgoing
    /// pair, bound to `hello_addr`.
    pub fn on_outbound_open(&self, connection: ConnectionId, caps: &TerminusCaps) -> Result<(), RouterError> {
        if !caps.is_inter_router_connection {
            return Err(RouterError::NonRouterConnection);
        }
        let mut inner = self.lock();
        let _bit = inner.mask_bit_for_connection(connection)?;
        trace!(
            "outbound connection {:?} opened, internode links {QD_INTERNODE_LINK_NAME_1}/{QD_INTERNODE_LINK_NAME_2} pending",
            connection
        );
        Ok(())
    }

    pub fn on_inbound_open(&self, _connection: ConnectionId) {
        // No-op: matches `router_inbound_open_handler` in the source.
    }

    pub fn on_detach(&self, id: LinkId, connection: ConnectionId) -> DetachResult {
        let mut inner = self.lock();
        let Some(record) = inner.links.remove(&id) else {
            return DetachResult::default();
        };

        let mut notify = None;

        if record.direction == LinkDirection::Outgoing {
            if let Some(owner) = record.owning_addr.clone() {
                if let Some(address) = inner.addresses.retrieve_mut(&owner) {
                    address.remove_rlink(id);
                }
                notify = inner.check_addr(&owner, true);
            }
            if record.link_type == LinkType::Router {
                let bit = record.mask_bit as usize;
                if bit < inner.out_links_by_mask_bit.len() {
                    if inner.out_links_by_mask_bit[bit] != Some(id) {
                        error!("mask-bit index mismatch releasing outgoing router link {}", id.value());
                    }
                    inner.out_links_by_mask_bit[bit] = None;
                }
            }
        }

        if record.direction == LinkDirection::Incoming && record.link_type == LinkType::Router {
            inner.release_mask_bit(connection, record.mask_bit);
        }

        let notify_mobile_removed = notify.filter(|key| key.starts_with('M'));
        DetachResult { notify_mobile_removed }
    }

    // ---- 4.3 Ingress pipeline ------------------------------------------

    /// Steps 3-11 of §4.3. Steps 1-2 (`message_receive`, advance + flow)
    /// happen in the caller, before the lock is ever touched.
    pub fn on_rx(
        &self,
        link_id: LinkId,
        message: &dyn IncomingMessage,
        delivery: DeliveryId,
        settled: bool,
    ) -> RxResult {
        let mut inner = self.lock();
        let mut activate = Vec::new();

        // Step 4: link-routing short-circuit.
        let connected = inner.links.get(&link_id).and_then(|l| l.connected_link);
        if let Some(connected_id) = connected {
            let routed = RoutedEvent::Message {
                message: RoutedMessage {
                    to: message.to().unwrap_or_default().to_string(),
                    trace: message.trace().to_vec(),
                    ingress: message.ingress().map(str::to_string),
                    body: message.body().to_vec(),
                },
                delivery: if settled { None } else { Some(delivery) },
            };
            if let Some(connected_link) = inner.links.get_mut(&connected_id) {
                connected_link.msg_fifo.push_back(routed);
                activate.push(connected_id);
            }
            let outcome = if settled { DeliveryOutcome::FreedSettled } else { DeliveryOutcome::LeftOpen };
            return RxResult { outcome, activate };
        }

        // Step 5: message validation.
        let Some(to) = message.to() else {
            return RxResult { outcome: DeliveryOutcome::Rejected, activate };
        };

        // Step 6: resolve address.
        let resolved = resolve_address(to, &self.config.area, &self.config.router_id);

        let Some(_probe) = inner.addresses.retrieve(&resolved.key) else {
            // Step 7/10: no subscribers.
            return RxResult { outcome: DeliveryOutcome::Released, activate };
        };

        // Step 8: annotate.
        let annotated = annotate(message.trace(), message.ingress(), &self.config.router_id_tag());
        if annotated.drop {
            // Loop detected: no fan-out, but local handler still fires if present.
            let handler = inner.addresses.retrieve(&resolved.key).and_then(|a| a.handler.clone());
            if let Some(handler) = handler {
                if let Some(address) = inner.addresses.retrieve_mut(&resolved.key) {
                    address.counters.to_container += 1;
                }
                let ingress_mask_bit = inner.links.get(&link_id).map(|l| l.mask_bit);
                drop(inner);
                let routed = RoutedMessage {
                    to: to.to_string(),
                    trace: annotated.trace,
                    ingress: Some(annotated.ingress),
                    body: message.body().to_vec(),
                };
                handler.handle(&routed, ingress_mask_bit);
                return RxResult { outcome: DeliveryOutcome::Accepted, activate };
            }
            return RxResult { outcome: DeliveryOutcome::Released, activate };
        }

        let mut fanout = 0u32;
        let mut ingress_attached = false;
        let mut handler_invocation = None;

        // Step 9a: local in-process handler.
        if let Some(address) = inner.addresses.retrieve_mut(&resolved.key) {
            if let Some(handler) = address.handler.clone() {
                address.counters.to_container += 1;
                handler_invocation = Some(handler);
            }
        }

        // Step 9b: local rlinks fan-out.
        if !resolved.is_local {
            let rlinks = inner.addresses.retrieve(&resolved.key).map(|a| a.rlinks.clone()).unwrap_or_default();
            for rlink in rlinks {
                let attach_delivery = if fanout == 0 && !settled {
                    ingress_attached = true;
                    Some(delivery)
                } else {
                    None
                };
                let routed = RoutedEvent::Message {
                    message: RoutedMessage {
                        to: to.to_string(),
                        trace: annotated.trace.clone(),
                        ingress: Some(annotated.ingress.clone()),
                        body: message.body().to_vec(),
                    },
                    delivery: attach_delivery,
                };
                if let Some(link) = inner.links.get_mut(&rlink) {
                    link.msg_fifo.push_back(routed);
                    activate.push(rlink);
                }
                fanout += 1;
                if let Some(address) = inner.addresses.retrieve_mut(&resolved.key) {
                    address.counters.egress += 1;
                }
            }
        }

        // Step 9c: remote rnodes fan-out via link_set dedup.
        if !resolved.is_local && !resolved.is_direct {
            let (bypass, rnode_bits) = inner
                .addresses
                .retrieve(&resolved.key)
                .map(|a| (a.semantics.bypass_valid_origins, a.rnodes.clone()))
                .unwrap_or((false, Vec::new()));

            // §4.3 step 9c, resolved against the original's
            // `if (ingress_iter && !bypass) { lookup } else origin = 0`:
            // origin defaults to 0 (permissive) both when the address's
            // semantics bypass valid-origins checking *and* when this
            // message has no pre-existing ingress annotation (i.e. this
            // router is itself the ingress — newly-originated traffic
            // cannot loop back to its own origin). Only a message that
            // arrived already carrying another router's ingress stamp
            // goes through the origin-address lookup, which may still
            // yield "no valid origin" (-1) if that address isn't known or
            // reaches more than one router.
            let origin = if bypass || annotated.ingress_preexisting.is_none() {
                Some(0)
            } else {
                let ingress_addr = annotated.ingress_preexisting.as_deref().expect("checked above");
                let origin_key = resolve_address(ingress_addr, &self.config.area, &self.config.router_id).key;
                let origin_record = inner.addresses.retrieve(&origin_key);
                match origin_record.map(|r| r.rnodes.as_slice()) {
                    Some([only]) => Some(*only),
                    _ => None,
                }
            };

            let mut link_set = LinkSet::new();
            if let Some(origin) = origin {
                for node_bit in &rnode_bits {
                    if let Some(node) = inner.nodes.get(*node_bit) {
                        if node.valid_origins.is_allowed(origin) {
                            if let Some(out_bit) = inner.nodes.outbound_mask_bit_for(node) {
                                link_set.insert(out_bit);
                            }
                        }
                    }
                }
            }

            for bit in link_set.drain() {
                let Some(out_link_id) = inner.out_links_by_mask_bit.get(bit as usize).copied().flatten()
                else {
                    continue;
                };
                let attach_delivery = if fanout == 0 && !settled {
                    ingress_attached = true;
                    Some(delivery)
                } else {
                    None
                };
                let routed = RoutedEvent::Message {
                    message: RoutedMessage {
                        to: to.to_string(),
                        trace: annotated.trace.clone(),
                        ingress: Some(annotated.ingress.clone()),
                        body: message.body().to_vec(),
                    },
                    delivery: attach_delivery,
                };
                if let Some(link) = inner.links.get_mut(&out_link_id) {
                    link.msg_fifo.push_back(routed);
                    activate.push(out_link_id);
                }
                fanout += 1;
                if let Some(address) = inner.addresses.retrieve_mut(&resolved.key) {
                    address.counters.transit += 1;
                }
            }
        }

        // Step 10: decide ingress delivery outcome.
        let outcome = if handler_invocation.is_some() {
            DeliveryOutcome::Accepted
        } else if fanout == 0 {
            DeliveryOutcome::Released
        } else if settled {
            DeliveryOutcome::FreedSettled
        } else {
            debug_assert!(ingress_attached, "unsettled delivery with fanout must be peered");
            DeliveryOutcome::LeftOpen
        };

        let ingress_mask_bit = inner.links.get(&link_id).map(|l| l.mask_bit);
        drop(inner);

        // Step 11: invoke the captured handler outside the lock.
        if let Some(handler) = handler_invocation {
            let routed = RoutedMessage {
                to: to.to_string(),
                trace: annotated.trace,
                ingress: Some(annotated.ingress),
                body: message.body().to_vec(),
            };
            handler.handle(&routed, ingress_mask_bit);
        }

        RxResult { outcome, activate }
    }

    // ---- 4.4 Egress scheduler -------------------------------------------

    pub fn on_writable(&self, link_id: LinkId, credit: u32) -> EgressReport {
        let mut inner = self.lock();
        let Some(link) = inner.links.get_mut(&link_id) else {
            return EgressReport::default();
        };

        let events: Vec<RoutedEvent> = link.event_fifo.drain(..).collect();

        let mut to_send_raw = Vec::new();
        if credit > 0 {
            let take = credit as usize;
            for _ in 0..take {
                match link.msg_fifo.pop_front() {
                    Some(event) => to_send_raw.push(event),
                    None => break,
                }
            }
        }
        let offer = link.msg_fifo.len();
        let starting_tag = inner.dtag;
        inner.dtag += to_send_raw.len() as u64;
        drop(inner);

        let mut to_send = Vec::with_capacity(to_send_raw.len());
        for (i, event) in to_send_raw.into_iter().enumerate() {
            if let RoutedEvent::Message { message, delivery } = event {
                to_send.push(EgressSend { message, tag: starting_tag + i as u64, peer_with: delivery });
            }
        }

        let mut status_actions = Vec::with_capacity(events.len());
        for event in events {
            if let RoutedEvent::Status { delivery, disposition, settle } = event {
                status_actions.push(StatusAction { delivery, disposition, settle });
            }
        }

        let mut inner = self.lock();
        let report_offered = offer > 0;
        let mut drain_flip = false;
        if let Some(link) = inner.links.get_mut(&link_id) {
            let (drain_changed, drain_mode) = link.protocol.drain_changed();
            link.drain_mode = drain_mode;
            if report_offered {
                link.protocol.offered(offer);
            } else {
                link.protocol.drained();
                // §4.4 step 5: only bump the event count if the receiver's
                // drain request just flipped to true; the scheduler never
                // sets drain mode itself.
                if drain_changed && drain_mode {
                    drain_flip = true;
                }
            }
        }
        let report_drained = !report_offered;

        EgressReport { to_send, status_actions, offer, report_offered, report_drained, drain_flip }
    }

    // ---- 4.5 Disposition bridge ------------------------------------------

    pub fn on_disposition(
        &self,
        changed: bool,
        disposition: Option<DeliveryDisposition>,
        settled: bool,
        peer: Option<(LinkId, DeliveryId)>,
    ) -> DispositionResult {
        let mut result = DispositionResult::default();
        if let Some((peer_link, peer_delivery)) = peer {
            if changed || settled {
                let mut inner = self.lock();
                if let Some(link) = inner.links.get_mut(&peer_link) {
                    link.event_fifo.push_back(RoutedEvent::Status {
                        delivery: peer_delivery,
                        disposition: if changed { disposition } else { None },
                        settle: settled,
                    });
                    result.activate.push(peer_link);
                }
            }
        }
        result.free_this_delivery = settled;
        result
    }

    // ---- 4.8 / §6 address registration -----------------------------------

    pub fn register_address(&self, key: AddressKey, handler: Arc<dyn AddressHandler>) {
        let mut inner = self.lock();
        inner.addresses.get_or_insert(key).handler = Some(handler);
    }

    pub fn unregister_address(&self, key: &AddressKey) -> DetachResult {
        let mut inner = self.lock();
        if let Some(record) = inner.addresses.retrieve_mut(key) {
            record.handler = None;
        }
        let notify = inner.check_addr(key, false);
        DetachResult { notify_mobile_removed: notify.filter(|k| k.starts_with('M')) }
    }

    // ---- Topology write surface -----------------------------------------
    //
    // §1 places the topology/reachability computation (hello protocol,
    // link-state flooding, shortest-path) out of scope: "the core consumes
    // the resulting per-router bitmasks". Something still has to write
    // `next_hop`/`peer_link`/`valid_origins` and the per-address `rnodes`
    // set, so this is that write surface — the mirror image of
    // `qd_router_add_node_ref_LH`/`router->routers_by_mask_bit[...]`
    // assignment in the original, called by the (external) topology layer,
    // never by the ingress/egress paths above.

    /// Creates or updates the router-node record at `mask_bit`. Called by
    /// the topology layer whenever link-state recomputation changes a
    /// remote router's next-hop or valid-origins mask.
    pub fn upsert_router_node(
        &self,
        mask_bit: MaskBit,
        next_hop: Option<MaskBit>,
        peer_link: Option<LinkId>,
        valid_origins: OriginMask,
    ) {
        let mut inner = self.lock();
        let origin_width = self.config.mask_table_width;
        if inner.nodes.get(mask_bit).is_none() {
            inner.nodes.insert(RouterNodeRecord::new(mask_bit, origin_width));
        }
        if let Some(record) = inner.nodes.get_mut(mask_bit) {
            record.next_hop = next_hop;
            record.peer_link = peer_link;
            record.valid_origins = valid_origins;
        }
    }

    /// Removes the router-node record at `mask_bit` (the remote router is
    /// no longer reachable at all).
    pub fn remove_router_node(&self, mask_bit: MaskBit) {
        let mut inner = self.lock();
        inner.nodes.remove(mask_bit);
    }

    /// Adds `mask_bit` to `key`'s set of remote destination routers
    /// (`addr.rnodes`), creating the address record if it does not yet
    /// exist. Mirrors `qd_router_add_node_ref_LH` applied to an address's
    /// node-reference list.
    pub fn add_route(&self, key: AddressKey, mask_bit: MaskBit) {
        let mut inner = self.lock();
        let record = inner.addresses.get_or_insert(key);
        if !record.rnodes.contains(&mask_bit) {
            record.rnodes.push(mask_bit);
        }
    }

    /// Removes `mask_bit` from `key`'s `rnodes` set and runs `check_addr`
    /// (the address may now be eligible for deletion).
    pub fn remove_route(&self, key: &AddressKey, mask_bit: MaskBit) {
        let mut inner = self.lock();
        if let Some(record) = inner.addresses.retrieve_mut(key) {
            record.rnodes.retain(|b| *b != mask_bit);
        }
        inner.check_addr(key, false);
    }

    /// Count of mask-bits still available in the free pool — a management/
    /// diagnostics read, not part of the routing algorithm itself.
    pub fn mask_bits_free(&self) -> usize {
        self.lock().neighbor_free_mask.free_count()
    }

    /// The mask-bit assigned to a router-typed link, or `0` for an
    /// endpoint link. The topology layer reads this off a freshly-opened
    /// inter-router connection's outgoing link to populate the
    /// directly-connected router-node record's own `mask_bit`/`peer_link`
    /// pair (see `upsert_router_node`).
    pub fn link_mask_bit(&self, id: LinkId) -> Option<MaskBit> {
        self.lock().links.get(&id).map(|l| l.mask_bit)
    }

    /// `qd_router_send`/`qd_router_send2`: locally-originated injection
    /// with no ingress delivery and, per §9's resolved Open Question, no
    /// `valid_origins` check.
    pub fn send_from_container(&self, to: &str, body: Vec<u8>) -> Vec<LinkId> {
        let mut inner = self.lock();
        let resolved = resolve_address(to, &self.config.area, &self.config.router_id);
        let mut activate = Vec::new();

        let rlinks = inner.addresses.retrieve(&resolved.key).map(|a| a.rlinks.clone()).unwrap_or_default();
        for rlink in rlinks {
            let routed = RoutedEvent::Message {
                message: RoutedMessage { to: to.to_string(), trace: vec![], ingress: None, body: body.clone() },
                delivery: None,
            };
            if let Some(link) = inner.links.get_mut(&rlink) {
                link.msg_fifo.push_back(routed);
                activate.push(rlink);
            }
        }

        let rnode_bits = inner.addresses.retrieve(&resolved.key).map(|a| a.rnodes.clone()).unwrap_or_default();
        let mut link_set = LinkSet::new();
        for node_bit in &rnode_bits {
            if let Some(node) = inner.nodes.get(*node_bit) {
                if let Some(out_bit) = inner.nodes.outbound_mask_bit_for(node) {
                    link_set.insert(out_bit);
                }
            }
        }
        for bit in link_set.drain() {
            let Some(out_link_id) = inner.out_links_by_mask_bit.get(bit as usize).copied().flatten() else {
                continue;
            };
            let routed = RoutedEvent::Message {
                message: RoutedMessage { to: to.to_string(), trace: vec![], ingress: None, body: body.clone() },
                delivery: None,
            };
            if let Some(link) = inner.links.get_mut(&out_link_id) {
                link.msg_fifo.push_back(routed);
                activate.push(out_link_id);
            }
        }

        activate
    }

    /// Activates each link in `ids` by calling its stored `ProtocolLink`,
    /// one short lock acquisition per link — never while holding the lock
    /// across the whole batch, matching `send_to_all_out_links`'s
    /// collect-then-act pattern.
    pub fn activate_links(&self, ids: &[LinkId]) {
        for id in ids {
            let mut inner = self.lock();
            if let Some(link) = inner.links.get_mut(id) {
                link.protocol.activate();
            }
        }
    }
}

fn protocol_set_source(inner: &Mutex<RouterInner>, id: LinkId, source: &str) {
    let mut inner = inner.lock().expect("router lock poisoned");
    if let Some(link) = inner.links.get_mut(&id) {
        link.protocol.set_source_address(source.to_string());
    }
}
