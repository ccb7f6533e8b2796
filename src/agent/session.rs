//! Agent sessions
//!
//! Identity of one running agent: who it is, which project it belongs to,
//! where its mail goes and any opaque metadata the caller wants to pass to
//! inference.

use crate::mail::{Address, AddressError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Static identity of an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub agent_id: String,
    pub project_id: String,
    /// `agent_id@project_id.agent`
    pub address: Address,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl AgentSession {
    /// Create a session addressed as `agent_id@project_id.agent`
    pub fn new(
        agent_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, AddressError> {
        let agent_id = agent_id.into();
        let project_id = project_id.into();
        let address = Address::agent(agent_id.clone(), project_id.clone())?;
        Ok(Self {
            agent_id,
            project_id,
            address,
            metadata: BTreeMap::new(),
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
