pub mod pool;
pub mod reset_codes;
pub mod subscribers;
pub mod usage;

pub use pool::create_pool;
