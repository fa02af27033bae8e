//! Command implementations and terminal output

pub mod aggregate;
pub mod history;
pub mod rates;
pub mod serve;
pub mod setup;
pub mod ui;
