pub mod chart;
pub mod order;
pub mod symbol;
pub mod ws;

pub use chart::*;
pub use order::*;
pub use symbol::*;
pub use ws::*;
