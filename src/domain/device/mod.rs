pub mod message;
pub mod state_machine;
