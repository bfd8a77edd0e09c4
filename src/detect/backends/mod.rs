pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubScorer;

#[cfg(feature = "backend-tract")]
pub use tract::TractScorer;
