//! Adapters: implementations of domain ports against the outside world.

pub mod agents;
