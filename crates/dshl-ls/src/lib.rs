//
// lib.rs
//
// Library entry point for dshl-ls: exposes modules for integration tests
//

pub mod config;
pub mod include_detect;
pub mod include_resolver;
pub mod path_util;
pub mod selector;
pub mod shader_config;
pub mod versioned_cache;
pub mod watch;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

pub mod backend;
pub mod handlers;
pub mod state;
