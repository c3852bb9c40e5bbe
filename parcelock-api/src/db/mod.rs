//! Record store access

pub mod tags;

pub use tags::TagRecord;
