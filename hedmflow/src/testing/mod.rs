//! Test utilities: mock executors for exercising the pipeline without
//! spawning real processes.

mod mocks;

pub use mocks::MockExecutor;
