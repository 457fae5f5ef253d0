pub mod models;
pub mod writer;

pub use writer::{recent_rounds, RoundWriter};
