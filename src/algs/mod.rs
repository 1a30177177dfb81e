pub mod communicator;
pub mod exchange;
pub mod wire;
