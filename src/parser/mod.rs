//! Response parser: raw service output → category probabilities.

mod category;
mod scores;

pub use category::*;
pub use scores::*;
