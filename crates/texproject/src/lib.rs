// lib.rs - Library crate for the LaTeX project engine.
//
// The binary in main.rs is a thin front end over these modules; benches/
// and tests/ use them directly.

pub mod cli;
pub mod config;
pub mod document_store;
pub mod error;
pub mod fs;
pub mod process;
pub mod project;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
