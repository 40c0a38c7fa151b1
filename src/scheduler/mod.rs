//! Job scheduling: priority queues and the workers that drain them.
//!
//! - **JobQueue**: three store lists (`queue_high`, `queue`, `queue_low`)
//!   drained in strict priority order with an atomic pop
//! - **Worker / WorkerPool**: loops that claim a job, call the collaborator
//!   and persist a terminal result
//! - **Job / JobResult**: the unit of work and its immutable outcome
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  Dispatcher  │
//!                      │  (CLI/API)   │
//!                      └──────┬───────┘
//!                             │ RPUSH
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!         queue_high        queue        queue_low
//!              └──────────────┼──────────────┘
//!                             │ LPOP, high first
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └──────── result:{id} + results_index ──┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_forge::scheduler::{Job, Priority, WorkerConfig, WorkerPool};
//!
//! queue.enqueue(&Job::new("Audit the payment module").with_priority(Priority::High)).await?;
//!
//! let mut pool = WorkerPool::new(WorkerConfig::from_forge(&config), context);
//! pool.start()?;
//! // ...
//! pool.shutdown().await?;
//! ```
//!
//! # Reliability
//!
//! - **Atomic dequeue**: LPOP hands each job to exactly one worker
//! - **No automatic retry**: a failed collaborator call is persisted as a
//!   `failed` result; retrying means enqueueing a new job
//! - **Graceful shutdown**: workers finish their current job before stopping

pub mod job;
pub mod queue;
pub mod worker;

pub use job::{Executor, Job, JobResult, JobStatus, Priority};
pub use queue::{JobQueue, QueueDepth};
pub use worker::{Iteration, PoolError, PoolStats, Worker, WorkerConfig, WorkerContext, WorkerPool};
