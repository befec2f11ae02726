pub mod classify;
pub mod recovery;
pub mod transition;
