//! Unit tests for the instance module.

mod job;
