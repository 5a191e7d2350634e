// Frame pipeline: detection, annotation, dual sink and replay

pub mod annotate;
pub mod detection;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod replay;
#[cfg(test)]
pub mod testing;
pub mod types;
