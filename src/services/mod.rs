pub mod background;
pub mod exporter;
pub mod inference;
pub mod normalizer;
pub mod orchestrator;
pub mod queue;
pub mod reconstruction;
pub mod reporter;
pub mod storage;
pub mod workspace;
