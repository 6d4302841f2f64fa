#![allow(clippy::collapsible_if)]
pub mod error;
pub mod fsops;
pub mod logs;
pub mod manager;
pub mod recovery;
pub mod routes;
pub mod settings;
pub mod state;
pub mod trash;
