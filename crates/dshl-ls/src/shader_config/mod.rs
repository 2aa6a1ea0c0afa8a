//
// shader_config/mod.rs
//
// Shader configuration discovery: where include directories come from
//

pub mod parse;
pub mod rescan;
pub mod scanner;
pub mod table;

pub use rescan::RescanWorker;
pub use scanner::{ConfigScanner, RescanReason, RescanRequest, ScanOutcome};
pub use table::{GameConfigs, IncludeDirectoryTable};
