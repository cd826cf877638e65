//! Shared helpers for the probe and harness integration tests.

#![allow(dead_code)]

pub mod fake_service;

pub use fake_service::FakeService;
