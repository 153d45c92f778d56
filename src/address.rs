use std::collections::HashMap;
use std::sync::Arc;

use crate::hash::{AddressClass, AddressKey};
use crate::link::{LinkId, RoutedMessage};
use crate::mask::MaskBit;

/// Callback surface for an in-process address handler, e.g. a management
/// agent subscribed via `RouterCore::register_address`. Implementors carry
/// their own context (a closure's captures, or a struct's fields) rather
/// than the source's separate `void *handler_context` — Rust has no need
/// for the split.
pub trait AddressHandler: Send + Sync {
    fn handle(&self, message: &RoutedMessage, ingress_mask_bit: Option<MaskBit>);
}

impl<F> AddressHandler for F
where
    F: Fn(&RoutedMessage, Option<MaskBit>) + Send + Sync,
{
    fn handle(&self, message: &RoutedMessage, ingress_mask_bit: Option<MaskBit>) {
        self(message, ingress_mask_bit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingDiscipline {
    Multicast,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSemantics {
    pub bypass_valid_origins: bool,
    pub forwarding: ForwardingDiscipline,
}

impl Default for AddressSemantics {
    fn default() -> Self {
        Self { bypass_valid_origins: false, forwarding: ForwardingDiscipline::Multicast }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddressCounters {
    pub ingress: u64,
    pub egress: u64,
    pub transit: u64,
    pub to_container: u64,
    pub from_container: u64,
}

pub struct AddressRecord {
    pub key: AddressKey,
    pub semantics: AddressSemantics,
    pub handler: Option<Arc<dyn AddressHandler>>,
    pub rlinks: Vec<LinkId>,
    pub rnodes: Vec<MaskBit>,
    pub counters: AddressCounters,
}

impl AddressRecord {
    pub fn new(key: AddressKey) -> Self {
        Self {
            key,
            semantics: AddressSemantics::default(),
            handler: None,
            rlinks: Vec::new(),
            rnodes: Vec::new(),
            counters: AddressCounters::default(),
        }
    }

    pub fn class(&self) -> AddressClass {
        self.key.class()
    }

    /// §3 invariant 1: eligible for deletion iff handler absent and both
    /// rlinks and rnodes are empty.
    pub fn is_eligible_for_deletion(&self) -> bool {
        self.handler.is_none() && self.rlinks.is_empty() && self.rnodes.is_empty()
    }

    pub fn add_rlink(&mut self, link: LinkId) {
        if !self.rlinks.contains(&link) {
            self.rlinks.push(link);
        }
    }

    pub fn remove_rlink(&mut self, link: LinkId) {
        self.rlinks.retain(|l| *l != link);
    }
}

/// Hash table from classified address keys to address records. Backed
/// directly by `HashMap` — see `src/hash.rs` for why no separate table
/// handle is stored in `AddressRecord`.
#[derive(Default)]
pub struct AddressTable {
    entries: HashMap<AddressKey, AddressRecord>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn retrieve(&self, key: &AddressKey) -> Option<&AddressRecord> {
        self.entries.get(key)
    }

    pub fn retrieve_mut(&mut self, key: &AddressKey) -> Option<&mut AddressRecord> {
        self.entries.get_mut(key)
    }

    /// Looks up `key`, inserting a fresh record with default semantics if
    /// absent.
    pub fn get_or_insert(&mut self, key: AddressKey) -> &mut AddressRecord {
        self.entries.entry(key.clone()).or_insert_with(|| AddressRecord::new(key))
    }

    pub fn remove(&mut self, key: &AddressKey) -> Option<AddressRecord> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
