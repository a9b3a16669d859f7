#[macro_use]
extern crate lazy_static;
extern crate tracing;

pub mod backend;
pub mod cli;
pub mod graph;
pub mod lifecycle;
pub mod logger;
pub mod settings;
