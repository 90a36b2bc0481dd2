pub mod assembler;
pub mod config;
pub mod error;
pub mod events;
pub mod mirror;
pub mod model;
pub mod parser;
pub mod planner;
pub mod queue;
pub mod scratch;
