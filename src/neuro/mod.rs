pub mod cell;
pub mod context;
pub mod factors;
pub mod mechanism;
pub mod modulation;
pub mod morphology;
pub mod scale;
pub mod schedule;
pub mod solver;
pub mod spatial;
pub mod stimuli;
pub mod synapse;

#[cfg(test)]
pub(crate) mod fixtures;
