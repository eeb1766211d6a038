// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform-assigned identifiers.
//!
//! All identifiers are opaque, stable 64-bit values handed out by the chat platform. They are
//! wrapped in distinct types so a role can never be confused with a user or a community by
//! accident.
use std::fmt::Display;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(u64::from_str(s)?))
            }
        }
    };
}

identifier!(
    /// Identifier of a community (guild, server) on the platform.
    CommunityId
);

identifier!(
    /// Identifier of a role. Role ids are globally unique and imply their owning community.
    RoleId
);

identifier!(
    /// Identifier of a user account.
    UserId
);

identifier!(
    /// Identifier of a text channel, used as destination for log entries.
    ChannelId
);

impl RoleId {
    /// Returns the implicit "everyone" pseudo-role of a community.
    ///
    /// Every member holds this role, it is never granted or saved. The platform gives it the
    /// same id as the community itself.
    pub const fn everyone(community_id: CommunityId) -> Self {
        Self(community_id.0)
    }

    /// Returns `true` if this is the "everyone" pseudo-role of the given community.
    pub const fn is_everyone(&self, community_id: CommunityId) -> bool {
        self.0 == community_id.0
    }
}
