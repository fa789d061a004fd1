//! # Relay-Pool Test Suite
//!
//! Cross-crate scenarios. Per-component behavior is tested next to the
//! component; this crate checks that the pieces hold their guarantees
//! together.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── fixtures.rs          # Scripted node, submitters, recording emitter
//!     ├── template_channel.rs  # Primary ⇄ relay over TCP
//!     ├── failover_shares.rs   # Share acceptance across failover
//!     ├── block_race.rs        # Candidate → race → block-found event
//!     ├── event_pipeline.rs    # Publisher → channel → ingestor → store
//!     └── runtime_roles.rs     # Full roles wired as the binary wires them
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p rp-tests
//! cargo test -p rp-tests integration::failover_shares::
//! ```

pub mod integration;
