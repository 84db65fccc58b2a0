//! End-to-end smoke tests live in `tests/smoke.rs`.
