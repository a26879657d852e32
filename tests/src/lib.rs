//! # Mailbox Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── rack_benchmarks.rs   # Criterion throughput/latency benches
//! └── src/integration/
//!     ├── rack_flows.rs        # Broker guarantees end to end
//!     └── http_flows.rs        # Submit/collect over a real socket
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p mailbox-tests
//!
//! # By category
//! cargo test -p mailbox-tests integration::rack_flows
//! cargo test -p mailbox-tests integration::http_flows
//!
//! # Benchmarks
//! cargo bench -p mailbox-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]
