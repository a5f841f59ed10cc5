//! Workspace facade for the Tunely tunnel broker/agent system.
//!
//! The actual broker and agent logic lives in their own workspace members
//! (`tunely-protocol`, `broker`, `agent`); this crate has no runtime code of
//! its own. It exists so the workspace root can host the end-to-end test
//! suite under `tests/integration/`, which exercises the broker and agent
//! crates together the way they run in production: over real sockets,
//! with no shortcuts through private internals.
