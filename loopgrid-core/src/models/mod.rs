pub mod config;
pub mod error;
pub mod frame;
pub mod grid;
pub mod loop_result;
pub mod stage;
