//! Namespaced channel identifiers.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::error::ChannelIdError;

/// Separator between namespace and action name.
pub const NAMESPACE_SEPARATOR: char = ':';

/// Namespace reserved for handshake, disconnect and ping actions.
pub const INTERNAL_NAMESPACE: &str = "script-bridge";

/// Reserved channel ids.
pub mod internal {
    pub const SESSION_CREATE: &str = "script-bridge:session-create";
    pub const CONNECT: &str = "script-bridge:connect";
    pub const DISCONNECT: &str = "script-bridge:disconnect";
    pub const PING: &str = "script-bridge:ping";
}

/// A routing key of the form `namespace:action`.
///
/// The namespace separator is mandatory; a `ChannelId` that exists has
/// already passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Validate and wrap a channel id.
    pub fn new(id: impl Into<String>) -> Result<Self, ChannelIdError> {
        let id = id.into();
        if !id.contains(NAMESPACE_SEPARATOR) {
            return Err(ChannelIdError::NamespaceRequired(id));
        }
        Ok(Self(id))
    }

    /// Validate a channel id for application use, rejecting the internal namespace.
    pub fn application(id: impl Into<String>) -> Result<Self, ChannelIdError> {
        let channel = Self::new(id)?;
        if channel.is_internal() {
            return Err(ChannelIdError::ReservedNamespace(channel.0));
        }
        Ok(channel)
    }

    /// Build one of the reserved ids from [`internal`].
    pub(crate) fn internal(id: &'static str) -> Self {
        debug_assert!(id.starts_with(INTERNAL_NAMESPACE));
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Everything before the first separator.
    pub fn namespace(&self) -> &str {
        self.0
            .split_once(NAMESPACE_SEPARATOR)
            .map(|(ns, _)| ns)
            .unwrap_or_default()
    }

    /// Whether this id belongs to the reserved internal namespace.
    pub fn is_internal(&self) -> bool {
        self.namespace() == INTERNAL_NAMESPACE
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for ChannelId {
    type Err = ChannelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = ChannelIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

/// Anything that can be validated into a [`ChannelId`] at a call site.
pub trait IntoChannelId {
    fn into_channel_id(self) -> Result<ChannelId, ChannelIdError>;
}

impl IntoChannelId for ChannelId {
    fn into_channel_id(self) -> Result<ChannelId, ChannelIdError> {
        Ok(self)
    }
}

impl IntoChannelId for &ChannelId {
    fn into_channel_id(self) -> Result<ChannelId, ChannelIdError> {
        Ok(self.clone())
    }
}

impl IntoChannelId for &str {
    fn into_channel_id(self) -> Result<ChannelId, ChannelIdError> {
        ChannelId::new(self)
    }
}

impl IntoChannelId for String {
    fn into_channel_id(self) -> Result<ChannelId, ChannelIdError> {
        ChannelId::new(self)
    }
}

impl IntoChannelId for &String {
    fn into_channel_id(self) -> Result<ChannelId, ChannelIdError> {
        ChannelId::new(self.as_str())
    }
}
