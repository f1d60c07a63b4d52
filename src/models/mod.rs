pub mod password_reset;
pub mod subscription;
pub mod usage;
