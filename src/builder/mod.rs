//! Build orchestration back-end.
//!
//! ## Overview
//!
//! The builder subsystem turns a natural-language project request into a
//! working project: a `BuildProject` row is created in SQLite, a private
//! workspace directory is allocated, and a pipeline task drives an
//! external code-generation agent through plan → build → test → deploy,
//! emitting real-time progress over a WebSocket. The agent may pause
//! mid-run to ask a clarifying question; the pipeline parks until a human
//! answer arrives and then resumes on the same workspace.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!      ws.rs  ──────────│         │ BuildOrchestrator::start_build()       │
//!                       │         v                                        │
//!                       │  pipeline.rs  (BuildOrchestrator, phase loop)    │
//!                       │     │            │               │               │
//!                       │     │ AgentRunner│::run()        │ Deployer      │
//!                       │     v            v               v               │
//!                       │  agent.rs     session.rs      deploy.rs         │
//!                       │  (CliAgent)   (SessionManager) (CliDeployer)    │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `models`    | Shared types: `BuildProject`, `BuildStatus`, events     |
//! | `db`        | SQLite access via `DbHandle` (thin `Arc<Mutex<_>>`)     |
//! | `events`    | `ProgressBus` — per-project broadcast of progress       |
//! | `workspace` | Per-project directories, listings, free-port probing    |
//! | `prompts`   | Deterministic prompt composition for the agent          |
//!
//! ## Typical Request Flow (`POST /api/builds`)
//!
//! 1. `api::create_build` validates and calls `start_build()`, which
//!    creates the row (`queued`), allocates the workspace, and returns the
//!    new id immediately.
//! 2. The spawned pipeline task enters `planning` (composes and records
//!    the build prompt), then `building` (spawns the agent CLI in the
//!    workspace, streaming stdout lines onto the `ProgressBus`).
//! 3. If the agent emits the awaiting-input marker, an
//!    `InteractiveSession` is created and the pipeline parks; answering
//!    via `POST /api/sessions/{id}/respond` resumes it with a
//!    continuation prompt.
//! 4. `testing` re-invokes the agent with a verification prompt. Non-local
//!    targets then run `deploying` through the provider CLI; local targets
//!    get a free dev-server port. The run ends in `complete`, or `failed`
//!    with the error recorded on the row.
//! 5. Every phase entry is persisted, appended to `build_logs`, and
//!    broadcast to all WebSocket subscribers of the project.

pub mod agent;
pub mod api;
pub mod db;
pub mod deploy;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod session;
pub mod workspace;
pub mod ws;
