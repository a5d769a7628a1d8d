pub mod admission;
pub mod dispatch;
pub mod entry;
pub mod leaf;
pub mod retry;
