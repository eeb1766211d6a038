// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::ops::{BitOr, Sub};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ChannelId, CommunityId, RoleId};

/// Stored preference whether a role is kept across a rejoin.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleAction {
    /// No explicit preference, fall back to the next level.
    #[default]
    Unset,

    /// Save the role and grant it again when the member rejoins.
    Persist,

    /// Never restore the role.
    Ignore,
}

impl RoleAction {
    pub fn is_unset(&self) -> bool {
        matches!(self, RoleAction::Unset)
    }
}

impl Display for RoleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoleAction::Unset => "unset",
            RoleAction::Persist => "persist",
            RoleAction::Ignore => "ignore",
        };

        write!(f, "{}", s)
    }
}

impl From<RoleAction> for u8 {
    fn from(value: RoleAction) -> Self {
        match value {
            RoleAction::Unset => 0,
            RoleAction::Persist => 1,
            RoleAction::Ignore => 2,
        }
    }
}

impl TryFrom<u8> for RoleAction {
    type Error = PolicyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RoleAction::Unset),
            1 => Ok(RoleAction::Persist),
            2 => Ok(RoleAction::Ignore),
            value => Err(PolicyError::InvalidRoleAction(value)),
        }
    }
}

/// How a community treats roles granting elevated capabilities.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DangerousMode {
    /// Dangerous roles are ignored unless a role policy explicitly says otherwise.
    #[default]
    IgnoreIfUnset,

    /// Dangerous roles are always ignored, even when the role is explicitly set to persist.
    AlwaysIgnore,

    /// Dangerous roles are treated like any other role. This is very insecure.
    NeverIgnore,
}

impl Display for DangerousMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DangerousMode::IgnoreIfUnset => "ignore if unset",
            DangerousMode::AlwaysIgnore => "always ignore",
            DangerousMode::NeverIgnore => "never ignore",
        };

        write!(f, "{}", s)
    }
}

impl From<DangerousMode> for u8 {
    fn from(value: DangerousMode) -> Self {
        match value {
            DangerousMode::IgnoreIfUnset => 0,
            DangerousMode::AlwaysIgnore => 1,
            DangerousMode::NeverIgnore => 2,
        }
    }
}

impl TryFrom<u8> for DangerousMode {
    type Error = PolicyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DangerousMode::IgnoreIfUnset),
            1 => Ok(DangerousMode::AlwaysIgnore),
            2 => Ok(DangerousMode::NeverIgnore),
            value => Err(PolicyError::InvalidDangerousMode(value)),
        }
    }
}

/// Set of log entry kinds a community wants to receive in its log channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogFlags(u8);

impl LogFlags {
    /// Nothing gets logged.
    pub const NONE: LogFlags = LogFlags(0);

    /// Log the saved role set of members leaving the community.
    pub const SAVED: LogFlags = LogFlags(1 << 0);

    /// Log the outcome of every restoration.
    pub const RESTORED: LogFlags = LogFlags(1 << 1);

    const ALL: u8 = Self::SAVED.0 | Self::RESTORED.0;

    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Returns `true` if all flags of `other` are set.
    pub const fn contains(&self, other: LogFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: LogFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: LogFlags) {
        self.0 &= !other.0;
    }

    /// Inserts or removes the given flags.
    pub fn set(&mut self, other: LogFlags, enabled: bool) {
        if enabled {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

impl BitOr for LogFlags {
    type Output = LogFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        LogFlags(self.0 | rhs.0)
    }
}

impl Sub for LogFlags {
    type Output = LogFlags;

    fn sub(self, rhs: Self) -> Self::Output {
        LogFlags(self.0 & !rhs.0)
    }
}

impl TryFrom<u8> for LogFlags {
    type Error = PolicyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & !Self::ALL != 0 {
            return Err(PolicyError::InvalidLogFlags(value));
        }
        Ok(LogFlags(value))
    }
}

impl Display for LogFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.contains(Self::SAVED), self.contains(Self::RESTORED)) {
            (false, false) => write!(f, "none"),
            (true, false) => write!(f, "saved"),
            (false, true) => write!(f, "restored"),
            (true, true) => write!(f, "saved, restored"),
        }
    }
}

/// Community-wide default policy.
///
/// A community without a stored record behaves exactly like `CommunityPolicy::new`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityPolicy {
    pub community_id: CommunityId,
    pub default_action: RoleAction,
    pub dangerous_mode: DangerousMode,
    pub log_channel: Option<ChannelId>,
    pub log_flags: LogFlags,
}

impl CommunityPolicy {
    pub fn new(community_id: CommunityId) -> Self {
        Self {
            community_id,
            default_action: RoleAction::Unset,
            dangerous_mode: DangerousMode::default(),
            log_channel: None,
            log_flags: LogFlags::NONE,
        }
    }

    /// Default action as it applies in practice: an unset default means roles are persisted.
    pub fn effective_default_action(&self) -> RoleAction {
        match self.default_action {
            RoleAction::Unset => RoleAction::Persist,
            action => action,
        }
    }

    /// Returns the log channel if entries of the given kind should be sent to it.
    pub fn log_destination(&self, kind: LogFlags) -> Option<ChannelId> {
        if self.log_flags.contains(kind) {
            self.log_channel
        } else {
            None
        }
    }
}

/// Per-role override of the community default.
///
/// Stores never retain a role policy with action `Unset`, writing one is equivalent to deleting
/// it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub role_id: RoleId,
    pub community_id: CommunityId,
    pub action: RoleAction,
}

impl RolePolicy {
    pub fn new(role_id: RoleId, community_id: CommunityId, action: RoleAction) -> Self {
        Self {
            role_id,
            community_id,
            action,
        }
    }

    /// Policy of a role which was never configured.
    pub fn unset(role_id: RoleId, community_id: CommunityId) -> Self {
        Self::new(role_id, community_id, RoleAction::Unset)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid role action value {0}")]
    InvalidRoleAction(u8),

    #[error("invalid dangerous role mode value {0}")]
    InvalidDangerousMode(u8),

    #[error("invalid log flags value {0:#04b}")]
    InvalidLogFlags(u8),
}
