pub mod fixture_project;
pub mod memory_fs;
