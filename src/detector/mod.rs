pub mod guard;
pub mod heuristics;
pub mod round;

pub use guard::DedupGuard;
pub use round::{DetectorConfig, RoundDetector};
