//! 核心编排层：配额、关联、调度、回调摄入、对账与引擎装配

pub mod correlator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod ingestor;
pub mod quota;
pub mod reconciler;
pub mod shutdown;

pub use correlator::RequestCorrelator;
pub use dispatcher::{BatchDispatcher, DispatchReport, PROVIDER_BATCH_CEILING};
pub use engine::RevealEngine;
pub use error::RevealError;
pub use ingestor::{CallbackIngestor, IngestOutcome};
pub use quota::{QuotaLimits, QuotaScope, QuotaTracker, QuotaWarning};
pub use reconciler::StatusReconciler;
pub use shutdown::{ShutdownCleanup, ShutdownManager, ShutdownReason};
