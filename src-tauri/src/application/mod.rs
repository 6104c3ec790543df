pub mod bootstrap;
pub mod commands;
pub mod history;
pub mod logging;
pub mod sync_controller;
