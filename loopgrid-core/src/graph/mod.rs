pub mod binding;
pub mod compositor;
pub mod lifecycle;
pub mod memory;
