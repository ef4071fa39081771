//! Core library: classification, stage rules, the flow store that moves
//! files between INBOX, DOCUMENTS and ARCHIVE, and tags kept in extended
//! attributes.

pub mod attributes;
pub mod classifier;
pub mod config;
pub mod error;
pub mod flow;
pub mod fs_apply;
pub mod layout;
pub mod lock;
pub mod models;
pub mod reports;
pub mod rules;
pub mod scanner;
pub mod status;
pub mod tags;

pub use error::FlowError;
pub use flow::FlowStore;
pub use models::{ClassificationResult, Stage};
