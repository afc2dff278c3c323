//! The decision chain: normalize, score, recommend, then the portfolio-facing stages.

pub mod alert_gate;
pub mod allocation;
pub mod composite;
pub mod normalizer;
pub mod recommendation;
pub mod risk;
pub mod scan;
pub mod sell;
pub mod sizing;

pub use alert_gate::{AlertCandidate, AlertGate, AlertGateState, AlertLog, SentAlert};
pub use composite::CompositeScorer;
pub use scan::{DecisionEngine, HoldingsReport, ScanReport, SymbolAnalysis};
