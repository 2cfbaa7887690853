pub mod device;
pub mod migration;
pub mod placement;
pub mod service;
pub mod topology;
pub mod utils;
