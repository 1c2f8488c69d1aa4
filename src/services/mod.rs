pub mod migrator;
pub mod queue;
pub mod reconciler;
pub mod sink;
pub mod staging;
pub mod worker;
