pub mod cluster;
pub mod node;
pub mod routing;
pub mod topology;
