pub mod database;
pub mod memory_queue;
pub mod pubsub;
pub mod queue;
pub mod redis;
pub mod sqs;
pub mod store;
