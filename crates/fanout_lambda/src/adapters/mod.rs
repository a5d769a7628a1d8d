pub mod invoke;
pub mod transport;
