pub mod clustered;
pub mod distributed;
pub mod request;
pub mod strategy;
