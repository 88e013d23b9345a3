pub mod job;
pub mod mesh;
pub mod report;
