//! Fuzz target for whole-organization operation sequences
//!
//! Decodes a sequence of operations and applies it to a simulated
//! organization through the command surface.
//!
//! # Invariants
//!
//! - The standard invariants hold after every request
//! - Stored invitation statuses match the reference model
//! - Refused operations never corrupt state

#![no_main]

use greet_harness::{Operation, OperationDriver};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u64, Vec<Operation>)| {
    let (seed, ops) = input;
    let mut driver = OperationDriver::new(seed).expect("fixture organization is valid");

    for op in &ops {
        if let Err(error) = driver.apply(op) {
            panic!("operation {op:?} failed: {error}");
        }
    }
});
