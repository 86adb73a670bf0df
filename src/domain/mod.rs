pub mod equipment;
pub mod meter;
pub mod types;

pub use equipment::*;
pub use meter::*;
pub use types::*;
