/// First byte of an `AddressKey`: `L` local, `M` mobile, `A` area, `R`
/// router. Routing rules depend entirely on this class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass {
    Local,
    Mobile,
    Area,
    Router,
}

impl AddressClass {
    fn prefix(self) -> u8 {
        match self {
            AddressClass::Local => b'L',
            AddressClass::Mobile => b'M',
            AddressClass::Area => b'A',
            AddressClass::Router => b'R',
        }
    }

    pub fn from_prefix(byte: u8) -> Option<Self> {
        match byte {
            b'L' => Some(AddressClass::Local),
            b'M' => Some(AddressClass::Mobile),
            b'A' => Some(AddressClass::Area),
            b'R' => Some(AddressClass::Router),
            _ => None,
        }
    }
}

/// The classified hash-key for an address: a class-prefixed byte string,
/// directly usable as a `HashMap` key. `std::collections::HashMap::remove`
/// is already O(1), so — unlike the source's `qd_hash_t` — no separate
/// table handle needs to be threaded back into the address record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressKey(Box<[u8]>);

impl AddressKey {
    fn from_parts(class: AddressClass, local: &str) -> Self {
        let mut bytes = Vec::with_capacity(local.len() + 1);
        bytes.push(class.prefix());
        bytes.extend_from_slice(local.as_bytes());
        Self(bytes.into_boxed_slice())
    }

    pub fn local(name: &str) -> Self {
        Self::from_parts(AddressClass::Local, name)
    }

    pub fn mobile(name: &str) -> Self {
        Self::from_parts(AddressClass::Mobile, name)
    }

    pub fn area(name: &str) -> Self {
        Self::from_parts(AddressClass::Area, name)
    }

    pub fn router(name: &str) -> Self {
        Self::from_parts(AddressClass::Router, name)
    }

    pub fn class(&self) -> AddressClass {
        AddressClass::from_prefix(self.0[0]).expect("AddressKey is always constructed with a valid class prefix")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for AddressKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Result of rewriting a wire address per the §6 mapping table: the
/// resolved hash key, plus the two flags the ingress pipeline needs that
/// are not otherwise derivable from the key alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub key: AddressKey,
    /// `_local/...` or the router's own full `_topo/<area>/<router>/...`.
    pub is_local: bool,
    /// The router's own full `_topo/<area>/<router>/...` specifically —
    /// suppresses transit (rnodes) propagation to avoid echo, per
    /// `direct_prefix` in the source.
    pub is_direct: bool,
}

/// Rewrites a wire `to` address into its hash-key form, exactly per the
/// table in §6. `area`/`router_id` identify this router.
pub fn resolve_address(to: &str, area: &str, router_id: &str) -> ResolvedAddress {
    if let Some(local) = to.strip_prefix("_local/") {
        return ResolvedAddress { key: AddressKey::local(local), is_local: true, is_direct: false };
    }

    if let Some(rest) = to.strip_prefix("_topo/") {
        let mut parts = rest.splitn(3, '/');
        let topo_area = parts.next().unwrap_or("");
        let topo_router = parts.next().unwrap_or("");
        let local = parts.next().unwrap_or("");

        if topo_area == "all" {
            // `_topo/all/all/<local>` — forward + local handler.
            return ResolvedAddress { key: AddressKey::local(local), is_local: true, is_direct: false };
        }

        if topo_area != area {
            return ResolvedAddress { key: AddressKey::area(topo_area), is_local: false, is_direct: false };
        }

        if topo_router == "all" {
            // `_topo/<my-area>/all/<local>` — forward + local handler.
            return ResolvedAddress { key: AddressKey::local(local), is_local: true, is_direct: false };
        }

        if topo_router != router_id {
            return ResolvedAddress { key: AddressKey::router(topo_router), is_local: false, is_direct: false };
        }

        return ResolvedAddress { key: AddressKey::local(local), is_local: true, is_direct: true };
    }

    ResolvedAddress { key: AddressKey::mobile(to), is_local: false, is_direct: false }
}
