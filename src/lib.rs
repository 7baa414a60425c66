//! Lambda Extensions Workspace - end-to-end tests of the extensions client
//! against the mock host.
//!
//! This is a virtual package that provides workspace-level integration tests.
//! The actual functionality is provided by the workspace member crates:
//!
//! - `lambda-extension-client`: Extensions and Telemetry API client
//! - `lambda-extension-mock`: Mock host serving both APIs locally
