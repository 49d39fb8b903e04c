//! Request/response correlation.
//!
//! - [`CorrelationTable`]: per-connection call id to method mapping.
//! - [`ResponseStatusCatalog`]: reply status code to label mapping, process wide.

pub mod correlation_table;
pub mod response_status;

pub use correlation_table::{CorrelationTable, MethodSummary};
pub use response_status::{ResponseStatus, ResponseStatusCatalog, StatusLabel};
