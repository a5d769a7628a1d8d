pub mod invoker;
pub mod transport;
