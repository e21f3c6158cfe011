//! Pattern detection and opportunity assessment.
//!
//! `PatternProcessor` scans candidate symbols each cycle, scores them with
//! a fixed weighted formula, classifies the pattern shape, and runs an
//! independent second-pass viability assessment before anything becomes a
//! snipe target.

pub mod assess;
pub mod processor;
pub mod score;

pub use assess::{OpportunityAssessment, RecommendedAction};
pub use processor::PatternProcessor;
