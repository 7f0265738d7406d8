pub mod common;
pub mod connections;
pub mod libraries;
pub mod rule_builder;
pub mod rules;
pub mod system;

pub use common::*;
pub use connections::*;
pub use libraries::*;
pub use rule_builder::*;
pub use rules::*;
pub use system::*;
