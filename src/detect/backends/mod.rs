#[cfg(feature = "backend-opencv")]
pub mod cascade;
pub mod scripted;
#[cfg(feature = "backend-tract")]
pub mod tract;

#[cfg(feature = "backend-opencv")]
pub use cascade::CascadeBackend;
pub use scripted::{parse_counts, ScriptedDetector};
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
