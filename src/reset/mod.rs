//! Factory reset: wipe the portfolio content tables behind an admin gate,
//! one job at a time, with every attempt recorded in an audit ledger.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Admin   │ ───────> │  api.rs  (route handlers, AppState, ApiError)    │
//! │  client  │ <─────── │    ├─ gate.rs  (token, confirmation, rate limit) │
//! └──────────┘   SSE    │    │                                             │
//!                       │    │ ResetOrchestrator::start()                  │
//!                       │    v                                             │
//!                       │  orchestrator.rs  (job lifecycle, workers)       │
//!                       │    │            │                                │
//!                       │    │ clear()    │ publish()                      │
//!                       │    v            v                                │
//!                       │  strategy.rs   progress.rs  (per-job broadcast)  │
//!                       │    │                                             │
//!                       │    v                                             │
//!                       │  db.rs  (ResetDb, DbHandle, ledger + migrations) │
//!                       │    └─ chain.rs  (SHA-256 event chain)            │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Job Lifecycle
//!
//! 1. `POST /api/admin/reset` passes the gate, then `start()` inserts a
//!    `STARTED` row in an immediate transaction. A partial unique index
//!    guarantees at most one `STARTED`/`IN_PROGRESS` row, across processes.
//! 2. The handler answers `202` while a spawned worker marks the job
//!    `IN_PROGRESS` and runs the configured `ClearingStrategy`.
//! 3. The worker records `COMPLETED` or `FAILED`, publishes the terminal
//!    event, then closes the job's progress channel.
//!
//! Active rows carry the owning connection's id and a lease that the worker
//! keeps renewing. Only rows whose lease ran out count as abandoned, so a
//! second process sharing the database never fails a job that is still
//! running. Subscribers in that second process follow the job by polling the
//! ledger until it reaches a terminal state.
//!
//! Every ledger write also appends a hash-chained event to
//! `reset_audit_events`, which `verify_ledger()` replays.

pub mod api;
pub mod chain;
pub mod db;
pub mod gate;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod strategy;
