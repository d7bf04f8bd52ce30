#![allow(dead_code)]

pub use enginesched_test_utils::*;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
