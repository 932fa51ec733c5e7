#[path = "../common/mod.rs"]
mod common;

mod command_tests;
mod wait_tests;
