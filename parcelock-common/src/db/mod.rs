//! Record store initialization

pub mod init;

pub use init::*;
