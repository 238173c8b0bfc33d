//! Proof/claim matching and report folding.

mod report;

pub use report::{
    compute_report, AggregateError, AppReport, NodeReport, Provenance, Report, ServiceReport,
};
