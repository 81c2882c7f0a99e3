//! End-to-end tests for the packed module loader
//!
//! These tests pack real artifact files, open them through the resource
//! backend and drive imports the way a host import system would.

mod harness;
mod artifact;
mod encrypted;

pub use harness::*;
