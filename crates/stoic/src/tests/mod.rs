//! Behavioural suites for the supervisor.

mod control_behaviour;
mod support;
