pub mod discovery;
pub mod graph;
