/// Result of rewriting a forwarded message's delivery-annotations (§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotated {
    /// The outgoing `trace` list: the incoming list, in order, with this
    /// router's id appended.
    pub trace: Vec<String>,
    /// Set when the incoming trace already contained this router's id —
    /// the message has looped and must not be fanned out further.
    pub drop: bool,
    /// The outgoing `ingress` scalar: preserved byte-for-byte if the
    /// incoming message had one, else this router's id.
    pub ingress: String,
    /// `Some(existing ingress)` when the incoming message already carried
    /// one — used by the ingress pipeline's origin-mask-bit lookup
    /// (§4.3 step 9c). `None` means this router is itself the ingress, in
    /// which case there is nothing to look up.
    pub ingress_preexisting: Option<String>,
}

/// Composes the `trace`/`ingress` delivery-annotations for a message about
/// to be forwarded. `router_id_tag` is this router's `<area>/<id>` form.
/// Other delivery-annotation keys are dropped by the caller; this function
/// only concerns itself with the two the core understands.
pub fn annotate(trace_in: &[String], ingress_in: Option<&str>, router_id_tag: &str) -> Annotated {
    let mut drop = false;
    let mut trace = Vec::with_capacity(trace_in.len() + 1);
    for hop in trace_in {
        if hop == router_id_tag {
            drop = true;
        }
        trace.push(hop.clone());
    }
    trace.push(router_id_tag.to_string());

    let (ingress, ingress_preexisting) = match ingress_in {
        Some(existing) => (existing.to_string(), Some(existing.to_string())),
        None => (router_id_tag.to_string(), None),
    };

    Annotated { trace, drop, ingress, ingress_preexisting }
}
