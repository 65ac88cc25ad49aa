pub mod general;
pub mod memory;
