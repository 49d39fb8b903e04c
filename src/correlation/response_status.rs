use log::warn;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Outcome carried by a reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResponseStatus {
    Ok,
    NotOk,
    Error,
}

impl ResponseStatus {
    pub const ALL: [ResponseStatus; 3] = [
        ResponseStatus::Ok,
        ResponseStatus::NotOk,
        ResponseStatus::Error,
    ];

    /// Status code as found in a reply frame.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResponseStatus::Ok),
            1 => Some(ResponseStatus::NotOk),
            2 => Some(ResponseStatus::Error),
            _ => None,
        }
    }

    /// Full names and abbreviations, case-insensitive.
    pub fn from_alias(alias: &str) -> Option<Self> {
        match alias.trim().to_ascii_lowercase().as_str() {
            "o" | "ok" => Some(ResponseStatus::Ok),
            "n" | "nok" | "notok" | "not_ok" | "not-ok" => Some(ResponseStatus::NotOk),
            "e" | "err" | "error" => Some(ResponseStatus::Error),
            _ => None,
        }
    }

    pub fn default_label(&self) -> &'static str {
        match self {
            ResponseStatus::Ok => "OK",
            ResponseStatus::NotOk => "NOT_OK",
            ResponseStatus::Error => "ERROR",
        }
    }
}

/// Label of a reply once classified. `Unclassified` is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLabel {
    Classified {
        status: ResponseStatus,
        label: String,
    },
    Unclassified,
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Classified { label, .. } => f.write_str(label),
            StatusLabel::Unclassified => f.write_str("unclassified"),
        }
    }
}

impl Serialize for StatusLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Maps reply status codes to human-readable labels. Immutable once built.
#[derive(Debug, Clone)]
pub struct ResponseStatusCatalog {
    labels: HashMap<ResponseStatus, String>,
}

impl ResponseStatusCatalog {
    /// Builds the catalog from the configured aliases.
    ///
    /// Each entry is `alias` or `alias=Label`. Without any configuration every
    /// status gets its default label. Unknown aliases are reported and skipped,
    /// which leaves their status unclassified.
    pub fn new(aliases: Option<&[String]>) -> Self {
        let aliases = match aliases {
            Some(a) => a,
            None => {
                return Self {
                    labels: ResponseStatus::ALL
                        .iter()
                        .map(|s| (*s, s.default_label().to_string()))
                        .collect(),
                }
            }
        };

        let mut labels = HashMap::new();
        for entry in aliases {
            let (alias, label) = match entry.split_once('=') {
                Some((alias, label)) => (alias, Some(label.trim())),
                None => (entry.as_str(), None),
            };
            match ResponseStatus::from_alias(alias) {
                Some(status) => {
                    let label = match label {
                        Some(l) if !l.is_empty() => l.to_string(),
                        _ => status.default_label().to_string(),
                    };
                    labels.insert(status, label);
                }
                None => warn!(
                    "Unrecognized response status '{}', it stays unclassified",
                    alias.trim()
                ),
            }
        }
        Self { labels }
    }

    pub fn classify(&self, code: u8) -> StatusLabel {
        ResponseStatus::from_code(code)
            .and_then(|status| {
                self.labels.get(&status).map(|label| StatusLabel::Classified {
                    status,
                    label: label.clone(),
                })
            })
            .unwrap_or(StatusLabel::Unclassified)
    }

    pub fn is_classified(&self, status: ResponseStatus) -> bool {
        self.labels.contains_key(&status)
    }
}

impl Default for ResponseStatusCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}
