#![allow(clippy::collapsible_if)]
pub mod ignore;
pub mod progress;
pub mod scan;
pub mod walk;

pub use scan::{ScanError, ScanReport, Scanner};
