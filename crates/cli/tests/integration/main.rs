//! CLI integration tests against an on-disk image store.

mod common;
