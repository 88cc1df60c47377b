pub mod build;
pub mod check;
pub mod config;
pub mod count;
pub mod init;
