//! Segment rule compiler and segmentation engine — maps declarative rule
//! sets onto customer predicates, estimates and previews segments.

pub mod compiler;
pub mod directory;
pub mod engine;
pub mod fields;
pub mod predicates;
pub mod preview;

pub use compiler::{compile, Combinator, Rule, RuleSet, UNKNOWN_OPERATOR_MATCHES_ALL};
pub use directory::{CustomerDirectory, InMemoryDirectory};
pub use engine::{NewSegment, Segment, SegmentationEngine};
pub use predicates::Predicate;
pub use preview::SegmentPreview;
