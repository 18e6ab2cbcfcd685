//! Commit-graph queries: which merge integrated a commit, and which upstream
//! commit a contributed commit became.

pub mod analyzer;

pub use analyzer::CommitGraphAnalyzer;
