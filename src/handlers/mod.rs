pub mod billing;
pub mod functions;
pub mod health;
pub mod password_reset;
pub mod usage;
