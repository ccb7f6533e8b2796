//! Mail addressing
//!
//! Provides type-safe addressing for agent-to-agent and agent-to-user
//! communication.
//!
//! # Address Format
//!
//! Addresses follow the form `entity@scope.suffix`:
//!
//! - `planner@billing.agent` - Agent `planner` in scope `billing`
//! - `alice@billing.user` - User session `alice` in scope `billing`
//! - `postmaster@billing.agent` - Source of bounce messages for a scope
//!
//! The scope may itself contain dots (`bot@team.infra.agent`); the suffix is
//! always the segment after the last dot.
//!
//! # Examples
//!
//! ```
//! use mailroom::mail::{resolve, Address, AddressSuffix};
//!
//! let addr = resolve("planner@billing.agent").unwrap();
//! assert_eq!(addr.entity_id(), "planner");
//! assert_eq!(addr.scope_id(), "billing");
//! assert_eq!(addr.suffix(), AddressSuffix::Agent);
//!
//! // Entity and scope compare case-insensitively
//! assert_eq!(addr, resolve("Planner@BILLING.agent").unwrap());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Error type for address parsing (the `MalformedAddress` class)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address format: expected 'entity@scope.suffix', got '{0}'")]
    InvalidFormat(String),

    #[error("address entity cannot be empty")]
    EmptyEntity,

    #[error("address scope cannot be empty")]
    EmptyScope,

    #[error("address is missing a routing suffix: '{0}'")]
    MissingSuffix(String),

    #[error("unknown routing suffix '{0}' (expected 'agent' or 'user')")]
    UnknownSuffix(String),

    #[error("address entity contains invalid characters: '{0}'")]
    InvalidEntityCharacters(String),

    #[error("address scope contains invalid characters: '{0}'")]
    InvalidScopeCharacters(String),
}

/// Routing domain of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSuffix {
    /// Agent-to-agent mail
    Agent,
    /// User-facing sink (a user session)
    User,
}

impl AddressSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressSuffix::Agent => "agent",
            AddressSuffix::User => "user",
        }
    }
}

impl FromStr for AddressSuffix {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("agent") {
            Ok(AddressSuffix::Agent)
        } else if s.eq_ignore_ascii_case("user") {
            Ok(AddressSuffix::User)
        } else {
            Err(AddressError::UnknownSuffix(s.to_string()))
        }
    }
}

impl fmt::Display for AddressSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated mail address
///
/// Immutable once constructed. Equality and hashing ignore ASCII case on the
/// entity and scope, while `Display` keeps the casing the address was built
/// with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    entity_id: String,
    scope_id: String,
    suffix: AddressSuffix,
}

impl Address {
    /// Create a new address from parts
    ///
    /// # Errors
    /// Returns an error if the entity or scope are empty or contain invalid characters.
    pub fn new(
        entity_id: impl Into<String>,
        scope_id: impl Into<String>,
        suffix: AddressSuffix,
    ) -> Result<Self, AddressError> {
        let entity_id = entity_id.into();
        let scope_id = scope_id.into();

        Self::validate_entity(&entity_id)?;
        Self::validate_scope(&scope_id)?;

        Ok(Self {
            entity_id,
            scope_id,
            suffix,
        })
    }

    /// Create an agent address (`entity@scope.agent`)
    pub fn agent(
        entity_id: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Result<Self, AddressError> {
        Self::new(entity_id, scope_id, AddressSuffix::Agent)
    }

    /// Create a user session address (`entity@scope.user`)
    pub fn user(
        entity_id: impl Into<String>,
        scope_id: impl Into<String>,
    ) -> Result<Self, AddressError> {
        Self::new(entity_id, scope_id, AddressSuffix::User)
    }

    /// The postmaster of this address's scope
    ///
    /// Returns `postmaster@{scope}.agent`. Bounces are sent from here.
    pub fn postmaster_of(&self) -> Self {
        Self {
            entity_id: "postmaster".to_string(),
            scope_id: self.scope_id.clone(),
            suffix: AddressSuffix::Agent,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn suffix(&self) -> AddressSuffix {
        self.suffix
    }

    /// Check if this is a user session address
    pub fn is_user(&self) -> bool {
        self.suffix == AddressSuffix::User
    }

    /// Check if this is a postmaster address
    pub fn is_postmaster(&self) -> bool {
        self.suffix == AddressSuffix::Agent && self.entity_id.eq_ignore_ascii_case("postmaster")
    }

    /// Check if this address is in the given scope
    pub fn is_in_scope(&self, scope_id: &str) -> bool {
        self.scope_id.eq_ignore_ascii_case(scope_id)
    }

    fn validate_entity(entity: &str) -> Result<(), AddressError> {
        if entity.is_empty() {
            return Err(AddressError::EmptyEntity);
        }

        if !entity
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AddressError::InvalidEntityCharacters(entity.to_string()));
        }

        Ok(())
    }

    fn validate_scope(scope: &str) -> Result<(), AddressError> {
        if scope.is_empty() {
            return Err(AddressError::EmptyScope);
        }

        // Dots separate scope segments, so empty segments are rejected
        if scope.split('.').any(str::is_empty)
            || !scope
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(AddressError::InvalidScopeCharacters(scope.to_string()));
        }

        Ok(())
    }
}

/// Parse and validate a raw address
///
/// Pure function; does not check that anything is registered at the address.
pub fn resolve(raw: &str) -> Result<Address, AddressError> {
    raw.parse()
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (entity, domain) = s
            .split_once('@')
            .ok_or_else(|| AddressError::InvalidFormat(s.to_string()))?;

        if domain.contains('@') {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }
        if domain.is_empty() {
            return Err(AddressError::EmptyScope);
        }

        let (scope, suffix) = domain
            .rsplit_once('.')
            .ok_or_else(|| AddressError::MissingSuffix(s.to_string()))?;

        Self::new(entity, scope, suffix.parse()?)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.suffix == other.suffix
            && self.entity_id.eq_ignore_ascii_case(&other.entity_id)
            && self.scope_id.eq_ignore_ascii_case(&other.scope_id)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.entity_id.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(b'@');
        for b in self.scope_id.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        self.suffix.hash(state);
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}.{}", self.entity_id, self.scope_id, self.suffix)
    }
}

/// A routing destination for messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingTarget {
    /// Route to an agent's mailbox
    Agent(Address),

    /// Route to a reserved user session sink
    UserSession(Address),
}

impl RoutingTarget {
    /// Determine the routing target for an address
    pub fn from_address(addr: &Address) -> Self {
        match addr.suffix() {
            AddressSuffix::Agent => RoutingTarget::Agent(addr.clone()),
            AddressSuffix::User => RoutingTarget::UserSession(addr.clone()),
        }
    }

    pub fn address(&self) -> &Address {
        match self {
            RoutingTarget::Agent(a) | RoutingTarget::UserSession(a) => a,
        }
    }
}
