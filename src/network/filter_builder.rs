//! Capture filter derivation.
//!
//! The filter is built once at startup from the configured base expression and
//! always ends up constraining both the transport (TCP) and at least one port.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Immutable capture filter text handed to every capture source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpression(String);

impl FilterExpression {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn port_token() -> &'static Regex {
    static PORT_TOKEN: OnceLock<Regex> = OnceLock::new();
    PORT_TOKEN.get_or_init(|| Regex::new(r"\bport\b").expect("port token pattern is valid"))
}

/// Builds the capture filter.
///
/// - explicit ports: `base and (port P1 or port P2 ...)`, in the given order
/// - no ports and no `port` token in `base`: `base and port {default_port}`
/// - otherwise `base` is kept as is
///
/// An empty base falls back to `tcp`.
pub fn build(base_filter: &str, explicit_ports: &[u16], default_port: u16) -> FilterExpression {
    let base = match base_filter.trim() {
        "" => "tcp",
        b => b,
    };

    if !explicit_ports.is_empty() {
        let clauses = explicit_ports
            .iter()
            .map(|p| format!("port {}", p))
            .collect::<Vec<_>>()
            .join(" or ");
        return FilterExpression(format!("{} and ({})", base, clauses));
    }

    if port_token().is_match(base) {
        FilterExpression(base.to_string())
    } else {
        FilterExpression(format!("{} and port {}", base, default_port))
    }
}
