pub mod plan;
pub mod state;

pub use plan::*;
pub use state::*;
