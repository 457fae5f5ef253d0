pub mod bets;
pub mod placement;

pub use bets::BetBook;
pub use placement::{bounded, place_legs};
