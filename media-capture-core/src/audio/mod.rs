pub mod sink;
pub mod state_machine;
