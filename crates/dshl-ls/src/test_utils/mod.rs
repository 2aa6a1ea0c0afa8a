//! Helpers for building on-disk shader workspaces in tests.

pub mod fixture_workspace;
