//! Library half of the demo/benchmark package: the test-only gate registry
//! (C10) and latency-statistics helper, shared between `main.rs` and the
//! integration tests under `tests/` so both drive the same gate
//! construction code an external consumer of `Engine` would.

pub mod gates;
pub mod stats;
