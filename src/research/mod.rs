/// Asynchronous research-job subsystem: run repository, API keys, stream
/// queue and the background worker.
pub mod api_keys;
pub mod queue;
pub mod runs;
pub mod worker;

pub use api_keys::ApiKeysRepo;
pub use queue::ResearchQueue;
pub use runs::RunsRepo;
pub use worker::ResearchWorker;
