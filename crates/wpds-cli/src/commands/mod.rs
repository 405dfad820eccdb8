pub mod report;
pub mod update;
