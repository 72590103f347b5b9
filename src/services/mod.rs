pub mod cache;
pub mod reconciliation;
pub mod recommendation;
pub mod store;
