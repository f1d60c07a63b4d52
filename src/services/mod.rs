pub mod auth_admin;
pub mod email;
pub mod password_reset;
pub mod pdf;
pub mod subscription;
pub mod usage;
