//! Command implementations

pub mod apply;
pub mod status;
pub mod version;
