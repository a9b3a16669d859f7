pub mod error;
pub mod session_sink;
pub mod sub_graph;
pub mod types;
