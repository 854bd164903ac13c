// Types - Shared data model of the inventory engine
pub mod records;
pub mod stats;
pub mod token;
pub mod validation;

pub use records::*;
pub use stats::*;
pub use token::*;
pub use validation::*;
