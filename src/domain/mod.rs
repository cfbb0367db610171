pub mod active_module;
pub mod errors;
pub mod ports;
pub mod regime;
pub mod shared_state;
pub mod types;
