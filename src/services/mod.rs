pub mod aggregator;
pub mod alerts;
pub mod engine;
pub mod hub;
pub mod indicators;
pub mod jobs;
pub mod scheduler;
pub mod store;
pub mod webhook;

pub use aggregator::ScoreAggregator;
pub use alerts::AlertEngine;
pub use engine::{CycleReport, ScoreEngine};
pub use hub::{AlertSink, Hub, PipelineEvent};
pub use scheduler::{Job, Scheduler};
pub use store::{MemoryStore, SqliteStore, Store};
pub use webhook::{WebhookDispatcher, WebhookSink};
