// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

/// Capability bitmask of a role as reported by the platform.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u64);

impl Permissions {
    pub const EMPTY: Permissions = Permissions(0);

    pub const CREATE_INSTANT_INVITE: Permissions = Permissions(1 << 0);
    pub const KICK_MEMBERS: Permissions = Permissions(1 << 1);
    pub const BAN_MEMBERS: Permissions = Permissions(1 << 2);
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const MANAGE_CHANNELS: Permissions = Permissions(1 << 4);
    pub const MANAGE_GUILD: Permissions = Permissions(1 << 5);
    pub const VIEW_AUDIT_LOG: Permissions = Permissions(1 << 7);
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const MANAGE_MESSAGES: Permissions = Permissions(1 << 13);
    pub const EMBED_LINKS: Permissions = Permissions(1 << 14);
    pub const VIEW_GUILD_INSIGHTS: Permissions = Permissions(1 << 19);
    pub const MUTE_MEMBERS: Permissions = Permissions(1 << 22);
    pub const DEAFEN_MEMBERS: Permissions = Permissions(1 << 23);
    pub const MOVE_MEMBERS: Permissions = Permissions(1 << 24);
    pub const CHANGE_NICKNAME: Permissions = Permissions(1 << 26);
    pub const MANAGE_NICKNAMES: Permissions = Permissions(1 << 27);
    pub const MANAGE_ROLES: Permissions = Permissions(1 << 28);
    pub const MANAGE_WEBHOOKS: Permissions = Permissions(1 << 29);
    pub const MANAGE_EMOJIS_AND_STICKERS: Permissions = Permissions(1 << 30);
    pub const MANAGE_EVENTS: Permissions = Permissions(1 << 33);
    pub const MANAGE_THREADS: Permissions = Permissions(1 << 34);
    pub const MODERATE_MEMBERS: Permissions = Permissions(1 << 40);
    pub const VIEW_MONETIZATION_ANALYTICS: Permissions = Permissions(1 << 41);
    pub const CREATE_GUILD_EXPRESSIONS: Permissions = Permissions(1 << 43);
    pub const CREATE_EVENTS: Permissions = Permissions(1 << 44);

    /// Capabilities which make a role "dangerous" to hand out automatically.
    ///
    /// Creating invites, events and expressions is granted to every member by default and is
    /// therefore not part of the mask.
    pub const DANGEROUS_MASK: Permissions = Permissions(
        // Full administrative override.
        Self::ADMINISTRATOR.0
            // Server-wide management.
            | Self::MANAGE_CHANNELS.0
            | Self::MANAGE_EMOJIS_AND_STICKERS.0
            | Self::MANAGE_EVENTS.0
            | Self::MANAGE_GUILD.0
            | Self::MANAGE_MESSAGES.0
            | Self::MANAGE_NICKNAMES.0
            | Self::MANAGE_ROLES.0
            | Self::MANAGE_THREADS.0
            | Self::MANAGE_WEBHOOKS.0
            // Moderation against other members.
            | Self::BAN_MEMBERS.0
            | Self::DEAFEN_MEMBERS.0
            | Self::KICK_MEMBERS.0
            | Self::MODERATE_MEMBERS.0
            | Self::MOVE_MEMBERS.0
            | Self::MUTE_MEMBERS.0
            // Insight into otherwise hidden server-wide information.
            | Self::VIEW_AUDIT_LOG.0
            | Self::VIEW_GUILD_INSIGHTS.0
            | Self::VIEW_MONETIZATION_ANALYTICS.0,
    );

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: Permissions) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `true` if any elevated capability is part of this set.
    pub const fn is_dangerous(&self) -> bool {
        self.intersects(Self::DANGEROUS_MASK)
    }
}

impl BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

impl BitAnd for Permissions {
    type Output = Permissions;

    fn bitand(self, rhs: Self) -> Self::Output {
        Permissions(self.0 & rhs.0)
    }
}

impl From<u64> for Permissions {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Display for Permissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
