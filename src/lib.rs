pub mod config;
pub mod crossref;
pub mod cursor;
pub mod error;
pub mod logging;
pub mod manager;
pub mod matcher;
pub mod models;
pub mod nevra;
pub mod normalizer;
pub mod repomd;
pub mod resolver;
pub mod sources;
pub mod store;
pub mod synthesizer;
pub mod updateinfo;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{MirrorError, Result};
pub use manager::{BlockReport, EmitReport, MatchReport, MatchRequest, MirrorManager};
pub use store::{SqlStore, Store};
pub use workflow::{RunOutcome, WorkflowQueue, WorkflowReport, WorkflowRequest, WorkflowRunner};
