pub mod cleanup;
pub mod compute;
pub mod dispatcher;
pub mod queue;
pub mod storage;
pub mod telemetry;
