use log::trace;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::response_status::StatusLabel;
use crate::decoding::types::{CallKey, MethodLabel};

/// Per-method bookkeeping kept for the lifetime of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSummary {
    pub calls: u64,
    /// `None` until a reply for this method has been seen.
    pub last_status: Option<StatusLabel>,
}

/// Pending calls of one connection, keyed by call id.
///
/// The request direction registers calls, the response direction resolves
/// them. One table per connection, never shared between connections.
///
/// Without a tracked-method configuration the table is disabled: nothing is
/// registered and every resolution yields [`MethodLabel::Unknown`].
#[derive(Debug, Clone)]
pub struct CorrelationTable {
    template: Option<Arc<[String]>>,
    pending: HashMap<CallKey, String>,
    methods: BTreeMap<String, MethodSummary>,
}

impl CorrelationTable {
    pub fn new(tracked_methods: Option<Arc<[String]>>) -> Self {
        let mut table = Self {
            template: tracked_methods,
            pending: HashMap::new(),
            methods: BTreeMap::new(),
        };
        table.reset();
        table
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.template.is_some()
    }

    /// Records an outgoing call. A reused key silently replaces the older call.
    pub fn register(&mut self, key: CallKey, method: &str) {
        if !self.is_enabled() {
            return;
        }
        if let Some(stale) = self.pending.insert(key, method.to_string()) {
            trace!("call {} reused, replacing pending {}", key, stale);
        }
        self.methods.entry(method.to_string()).or_default().calls += 1;
    }

    /// Looks up and retires the call a reply answers.
    pub fn resolve(&mut self, key: CallKey) -> MethodLabel {
        match self.pending.remove(&key) {
            Some(method) => MethodLabel::Known(method),
            None => MethodLabel::Unknown,
        }
    }

    pub fn record_status(&mut self, method: &MethodLabel, status: StatusLabel) {
        if let MethodLabel::Known(name) = method {
            if let Some(summary) = self.methods.get_mut(name) {
                summary.last_status = Some(status);
            }
        }
    }

    /// Back to the configured state: no pending calls, every tracked method "not yet called".
    pub fn reset(&mut self) {
        self.pending.clear();
        self.methods.clear();
        if let Some(template) = &self.template {
            for name in template.iter() {
                self.methods.insert(name.clone(), MethodSummary::default());
            }
        }
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn summary(&self) -> &BTreeMap<String, MethodSummary> {
        &self.methods
    }
}
