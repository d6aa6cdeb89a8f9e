// ===============================
// src/lib.rs
// ===============================
pub mod domain;
pub mod error;
pub mod config;
pub mod metrics;
pub mod recorder;
pub mod ledger;        // calculator + form drafts (no I/O)
pub mod normalize;     // sheet rows -> domain records
pub mod callbacks;     // callback-name registry for the callback channel
pub mod transport;     // callback / direct GET against the sheet endpoint
pub mod client;        // primary -> fallback policy, payload classification
pub mod replica;
pub mod sync;          // LedgerSync: views + write/refetch flow
pub mod mock_service;  // in-memory sheet (hyper), dev & tests
