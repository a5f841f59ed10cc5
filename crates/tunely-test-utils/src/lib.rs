//! Shared test utilities for the broker/agent integration suite.

pub mod mock_agent_client;

pub use mock_agent_client::MockAgentClient;
