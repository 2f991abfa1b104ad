//! Per-connection processing pipeline.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → Pipeline::fire_read (transport end)
//!     → proxy → ssl → ssl-reader → logging → channel-metrics → ...
//!     → take_inbound (driver)
//!
//! Pipeline::write (application end)
//!     → ... → ssl (encrypt) → take_outbound → socket
//! ```
//!
//! # Design Decisions
//! - Stage names are a closed enum, insertion relative to a missing stage is an error
//! - One task owns a pipeline; no locks inside
//! - Handlers may remove themselves while running

pub mod chain;
pub mod handler;
pub mod handlers;
pub mod stage;

pub use chain::{ChannelInfo, Context, Pipeline};
pub use handler::{Cause, Handler, HandshakeCompletion, Inbound, Outbound, UserEvent};
pub use handlers::{ChannelMetricsHandler, LoggingHandler};
pub use stage::StageName;

/// Error type for pipeline structure operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("stage `{0}` already exists")]
    DuplicateStage(StageName),
    #[error("no stage named `{0}`")]
    NoSuchStage(StageName),
}
