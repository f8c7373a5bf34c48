//! statig state machines.

pub mod driver_sm;
