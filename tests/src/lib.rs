//! End-to-end checks that run whole DAGs through the orchestrator.

pub mod support;

#[cfg(test)]
mod discovery;
#[cfg(test)]
mod engine;
