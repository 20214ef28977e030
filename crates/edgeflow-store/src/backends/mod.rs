//! Store backends.

pub mod memory;
pub mod redb;
