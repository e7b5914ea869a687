pub mod config;
pub mod error;
pub mod imgdec;
pub mod jpip;
pub mod manager;
pub mod session;
pub mod util;
