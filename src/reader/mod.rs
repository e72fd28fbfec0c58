pub mod context;
pub mod problems;
pub mod inconsistency;
pub mod resolver;
