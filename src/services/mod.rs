pub mod dispatcher;
pub mod gateway;
pub mod lease;
pub mod provider;
pub mod queue;
pub mod storage;
