// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable entries posted to a community's log channel.
use std::fmt::{self, Display};

use rolekeeper_core::{CommunityId, LogFlags, RoleId, UserId};

/// Entry for the log channel of a community.
///
/// Users and roles are rendered with the platform's mention syntax (`<@user>` and `<@&role>`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntry {
    /// Outcome of a restoration.
    Restored {
        community_id: CommunityId,
        user_id: UserId,
        restored: Vec<RoleId>,
        failed: Vec<(RoleId, String)>,
    },

    /// Role set which was saved for a member who left.
    Saved {
        community_id: CommunityId,
        user_id: UserId,
        role_ids: Vec<RoleId>,
    },
}

impl LogEntry {
    /// Flag a community needs to enable to receive this kind of entry.
    pub fn kind(&self) -> LogFlags {
        match self {
            LogEntry::Restored { .. } => LogFlags::RESTORED,
            LogEntry::Saved { .. } => LogFlags::SAVED,
        }
    }

    pub fn community_id(&self) -> CommunityId {
        match self {
            LogEntry::Restored { community_id, .. } | LogEntry::Saved { community_id, .. } => {
                *community_id
            }
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            LogEntry::Restored { user_id, .. } | LogEntry::Saved { user_id, .. } => *user_id,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            LogEntry::Restored { .. } => "User roles restored",
            LogEntry::Saved { .. } => "User roles saved",
        }
    }
}

fn write_roles(f: &mut fmt::Formatter<'_>, role_ids: &[RoleId]) -> fmt::Result {
    for (index, role_id) in role_ids.iter().enumerate() {
        if index > 0 {
            write!(f, ", ")?;
        }
        write!(f, "<@&{role_id}>")?;
    }
    Ok(())
}

impl Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "**{}**", self.title())?;
        writeln!(f, "User: <@{}>", self.user_id())?;

        match self {
            LogEntry::Restored {
                restored, failed, ..
            } => {
                write!(f, "Roles: ")?;
                if restored.is_empty() {
                    write!(f, "No roles restored")?;
                } else {
                    write_roles(f, restored)?;
                }

                if !failed.is_empty() {
                    write!(f, "\nFailed:")?;
                    for (role_id, reason) in failed {
                        write!(f, "\n<@&{role_id}> - {reason}")?;
                    }
                }
            }
            LogEntry::Saved { role_ids, .. } => {
                write!(f, "Roles: ")?;
                if role_ids.is_empty() {
                    write!(f, "No roles saved")?;
                } else {
                    write_roles(f, role_ids)?;
                }
            }
        }

        Ok(())
    }
}
