//! Property/Op Queue (§4.4).
//!
//! A single logical FIFO of outbound cloud operations. Correlation with the
//! cloud-client peer is by monotonically increasing request id; ops needing
//! confirmation move into an "awaiting confirm" map keyed by that id. This
//! module is transport-agnostic: [`Poq`] produces and consumes plain data,
//! the actual socket I/O lives in [`crate::eia`].

pub mod file;

use std::collections::{HashMap, VecDeque};

bitflags::bitflags! {
    /// Destination classes an op may target (§4.4.3).
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Dests: u8 {
        const ADS = 0b01;
        const LAN = 0b10;
    }
}

/// Reference to the property a queued op concerns.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PropRef {
    pub address: String,
    pub subdevice: String,
    pub template: String,
    pub name: String,
}

/// Requested property listing for a `property_request` op.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestScope {
    ByName(String),
    All,
    AllToDevice,
}

/// The operation kinds recognized by the queue (§4.4.1).
#[derive(Clone, Debug)]
pub enum OpKind {
    PropertySend,
    PropertyResponse,
    PropertyRequest(RequestScope),
    Ack,
    DatapointCreate,
    DatapointSend,
    DatapointRequest,
    DatapointFetched,
    NodeAdd,
    NodeUpdate,
    NodeRemove,
    BatchSend,
}

impl OpKind {
    /// §9: the transport always requires a confirmation correlation for
    /// property sends, regardless of the caller's `confirm` flag.
    fn forces_confirm(&self) -> bool {
        matches!(self, OpKind::PropertySend | OpKind::BatchSend)
    }
}

/// Per-op metadata key/value pairs (§4.4.6): at most 10, keys alphanumeric
/// and <= 255 bytes.
pub fn validate_metadata(pairs: &[(String, String)]) -> bool {
    pairs.len() <= 10 && pairs.iter().all(|(k, _)| !k.is_empty() && k.len() <= 255 && k.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Shared options for one op or one batch.
#[derive(Clone, Debug, Default)]
pub struct OpOptions {
    /// `None` means "unspecified": resolved at confirmation time (§4.4.3).
    pub dests: Option<Dests>,
    pub confirm_required: bool,
    pub echo: bool,
    pub dev_time_ms: Option<i64>,
    pub metadata: Vec<(String, String)>,
}

/// Cloud-layer error class (§7).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloudErr {
    Conn,
    App,
    Unknown,
}

/// Outcome handed to an op's confirm callback.
#[derive(Clone, Debug)]
pub struct ConfirmResult {
    pub success: bool,
    pub err: Option<CloudErr>,
    pub dests: Dests,
}

/// Outcome handed to an op's nak callback.
#[derive(Clone, Debug)]
pub struct NakResult {
    pub err: CloudErr,
}

/// One queued operation.
pub struct Op {
    pub id: u64,
    pub kind: OpKind,
    pub prop: Option<PropRef>,
    pub value: Option<crate::value::Value>,
    pub options: OpOptions,
    pub request_id: Option<u64>,
    pub on_confirm: Option<Box<dyn FnOnce(ConfirmResult) + Send>>,
    pub on_nak: Option<Box<dyn FnOnce(NakResult) + Send>>,
}

impl Op {
    fn forces_confirm(&self) -> bool {
        self.kind.forces_confirm()
    }
}

/// A batch of property sends, timestamp-ordered (§3.5).
pub struct Batch {
    pub id: u64,
    pub ops: Vec<Op>,
    pub options: OpOptions,
}

impl Batch {
    pub fn new(id: u64, options: OpOptions) -> Self {
        Self { id, ops: Vec::new(), options }
    }

    /// Inserts `op` at the sorted position by `dev_time_ms` ascending.
    pub fn append(&mut self, op: Op) {
        let t = op.options.dev_time_ms.unwrap_or(0);
        let pos = self.ops.iter().position(|o| o.options.dev_time_ms.unwrap_or(0) > t).unwrap_or(self.ops.len());
        self.ops.insert(pos, op);
    }
}

/// The Property/Op Queue.
pub struct Poq {
    next_id: u64,
    next_batch_id: u64,
    pending: VecDeque<Op>,
    awaiting_confirm: HashMap<u64, Op>,
    ads_up: bool,
    lan_peers: Vec<String>,
}

impl Default for Poq {
    fn default() -> Self {
        Self::new()
    }
}

impl Poq {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            next_batch_id: 1,
            pending: VecDeque::new(),
            awaiting_confirm: HashMap::new(),
            ads_up: false,
            lan_peers: Vec::new(),
        }
    }

    /// Next request id, incrementing by 1 with wrap to 1 (§6).
    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = if self.next_id == u64::MAX { 1 } else { self.next_id + 1 };
        id
    }

    pub fn alloc_batch_id(&mut self) -> u64 {
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        id
    }

    /// Enqueues an op, assigning its request id. Called from any thread in
    /// the real daemon via a self-pipe wakeup (§4.4.1); here it is a plain
    /// synchronous push, the wakeup plumbing lives in [`crate::eia`].
    pub fn enqueue(&mut self, kind: OpKind, prop: Option<PropRef>, value: Option<crate::value::Value>, options: OpOptions) -> u64 {
        let id = self.alloc_id();
        self.pending.push_back(Op {
            id,
            kind,
            prop,
            value,
            options,
            request_id: None,
            on_confirm: None,
            on_nak: None,
        });
        id
    }

    pub fn enqueue_with_callbacks(
        &mut self, kind: OpKind, prop: Option<PropRef>, value: Option<crate::value::Value>, options: OpOptions,
        on_confirm: Option<Box<dyn FnOnce(ConfirmResult) + Send>>, on_nak: Option<Box<dyn FnOnce(NakResult) + Send>>,
    ) -> u64 {
        let id = self.alloc_id();
        self.pending.push_back(Op { id, kind, prop, value, options, request_id: None, on_confirm, on_nak });
        id
    }

    pub fn set_ads_up(&mut self, up: bool) {
        self.ads_up = up;
    }

    pub fn ads_up(&self) -> bool {
        self.ads_up
    }

    pub fn set_lan_peers(&mut self, peers: Vec<String>) {
        self.lan_peers = peers;
    }

    /// Drains all queued ops for one `poll` cycle (§4.4.1). Ops that require
    /// confirmation (explicitly, or implicitly for property sends per §9)
    /// move into the awaiting-confirm table; others are returned "freed"
    /// (the caller has nothing further to track).
    pub fn poll(&mut self) -> Vec<Op> {
        let mut to_send = Vec::new();
        while let Some(op) = self.pending.pop_front() {
            if op.options.confirm_required || op.forces_confirm() {
                to_send.push(self.track(op));
            } else {
                to_send.push(op);
            }
        }
        to_send
    }

    fn track(&mut self, mut op: Op) -> Op {
        // We hand a cheap clone of the wire-relevant fields to the caller
        // for transmission while the original (with callbacks) stays keyed
        // by request id in the awaiting-confirm table.
        op.request_id = Some(op.id);
        let wire = Op {
            id: op.id,
            kind: op.kind.clone(),
            prop: op.prop.clone(),
            value: op.value.clone(),
            options: op.options.clone(),
            request_id: op.request_id,
            on_confirm: None,
            on_nak: None,
        };
        self.awaiting_confirm.insert(op.id, op);
        wire
    }

    /// Resolves the cloud-client peer's `confirm(true, req_id)`.
    pub fn confirm_true(&mut self, req_id: u64) {
        if let Some(op) = self.awaiting_confirm.remove(&req_id) {
            let dests = self.resolve_dests(op.options.dests);
            if let Some(cb) = op.on_confirm {
                cb(ConfirmResult { success: true, err: None, dests });
            }
        }
    }

    /// Resolves the cloud-client peer's `confirm(false, req_id, err, dests)`.
    pub fn confirm_false(&mut self, req_id: u64, err: CloudErr, dests: Dests) {
        if let Some(op) = self.awaiting_confirm.remove(&req_id) {
            if let Some(cb) = op.on_confirm {
                cb(ConfirmResult { success: false, err: Some(err), dests });
            }
        }
    }

    /// Resolves a `nak(req_id, err, ...)`. Only `CloudErr::Conn` counts as
    /// an ADS failure for the caller's bookkeeping.
    pub fn nak(&mut self, req_id: u64, err: CloudErr) {
        if let Some(op) = self.awaiting_confirm.remove(&req_id) {
            if let Some(cb) = op.on_nak {
                cb(NakResult { err });
            }
        }
    }

    /// Number of ops still awaiting confirmation (used by tests to check
    /// invariant 3 in §8: no op leaks into the awaiting-confirm list).
    pub fn awaiting_confirm_len(&self) -> usize {
        self.awaiting_confirm.len()
    }

    /// §4.4.3: expand "unspecified" destinations to whichever class is
    /// actually up, preferring ADS.
    pub fn resolve_dests(&self, requested: Option<Dests>) -> Dests {
        match requested {
            Some(d) => d,
            None if self.ads_up => Dests::ADS,
            None if !self.lan_peers.is_empty() => Dests::LAN,
            None => Dests::empty(),
        }
    }
}
