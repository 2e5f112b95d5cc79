//! Test suites for the webterm harness.

mod restart_behaviour;
pub(crate) mod support;
