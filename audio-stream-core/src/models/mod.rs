pub mod config;
pub mod creation;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod handle;
pub mod state;
