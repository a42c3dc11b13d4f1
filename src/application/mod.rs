//! Application layer: use-case orchestration over the service layer.

pub mod dispatcher;

pub use dispatcher::{
    CandidateSummary, DispatchDecision, DispatchError, DispatchMode, DispatchReport,
    DispatchResult, Dispatcher,
};
