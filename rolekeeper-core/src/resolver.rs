// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::{CommunityPolicy, DangerousMode, RoleAction, RolePolicy};

/// Final decision for a single role, never "unset".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    Persist,
    Ignore,
}

impl Disposition {
    pub fn is_persist(&self) -> bool {
        matches!(self, Disposition::Persist)
    }
}

impl From<Disposition> for RoleAction {
    fn from(value: Disposition) -> Self {
        match value {
            Disposition::Persist => RoleAction::Persist,
            Disposition::Ignore => RoleAction::Ignore,
        }
    }
}

impl Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        RoleAction::from(*self).fmt(f)
    }
}

/// Combines community and role policy with the live danger classification of a role.
///
/// Precedence, from strongest to weakest:
///
/// 1. A dangerous role in an `AlwaysIgnore` community is ignored, explicit role policies can not
///    override this.
/// 2. A dangerous role without explicit role policy in an `IgnoreIfUnset` community is ignored.
/// 3. The explicit role policy.
/// 4. The community default.
/// 5. Persist.
///
/// Every call site asking for the disposition of a role has to go through this function.
pub fn resolve(
    community_policy: &CommunityPolicy,
    role_policy: &RolePolicy,
    is_dangerous: bool,
) -> Disposition {
    if is_dangerous {
        match community_policy.dangerous_mode {
            DangerousMode::AlwaysIgnore => return Disposition::Ignore,
            DangerousMode::IgnoreIfUnset if role_policy.action.is_unset() => {
                return Disposition::Ignore;
            }
            DangerousMode::IgnoreIfUnset | DangerousMode::NeverIgnore => (),
        }
    }

    let action = match role_policy.action {
        RoleAction::Unset => community_policy.default_action,
        action => action,
    };

    match action {
        RoleAction::Ignore => Disposition::Ignore,
        RoleAction::Persist | RoleAction::Unset => Disposition::Persist,
    }
}
