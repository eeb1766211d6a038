// SPDX-License-Identifier: MIT OR Apache-2.0

//! Platform events and their registration.
use std::collections::{BTreeSet, HashMap};
use std::ptr;
use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rolekeeper_core::{CommunityId, RoleId, UserId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::platform::Platform;
use crate::warden::{Warden, WardenError, WardenStore};

/// Kinds of platform events rolekeeper reacts to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    MemberJoined,
    MemberLeft,
    RolesChanged,
    RoleDeleted,
    CommunityJoined,
    CommunityLeft,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::MemberJoined,
        EventKind::MemberLeft,
        EventKind::RolesChanged,
        EventKind::RoleDeleted,
        EventKind::CommunityJoined,
        EventKind::CommunityLeft,
    ];
}

/// Inbound event from the platform gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlatformEvent {
    MemberJoined {
        community_id: CommunityId,
        user_id: UserId,
    },

    MemberLeft {
        community_id: CommunityId,
        user_id: UserId,
    },

    /// Role set of a member changed. The previous set is `None` if the gateway didn't have it
    /// cached.
    RolesChanged {
        community_id: CommunityId,
        user_id: UserId,
        old_roles: Option<BTreeSet<RoleId>>,
        new_roles: BTreeSet<RoleId>,
    },

    RoleDeleted {
        community_id: CommunityId,
        role_id: RoleId,
    },

    /// Agent was added to a community.
    CommunityJoined { community_id: CommunityId },

    /// Agent was removed from a community.
    CommunityLeft { community_id: CommunityId },
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::MemberJoined { .. } => EventKind::MemberJoined,
            PlatformEvent::MemberLeft { .. } => EventKind::MemberLeft,
            PlatformEvent::RolesChanged { .. } => EventKind::RolesChanged,
            PlatformEvent::RoleDeleted { .. } => EventKind::RoleDeleted,
            PlatformEvent::CommunityJoined { .. } => EventKind::CommunityJoined,
            PlatformEvent::CommunityLeft { .. } => EventKind::CommunityLeft,
        }
    }

    pub fn community_id(&self) -> CommunityId {
        match self {
            PlatformEvent::MemberJoined { community_id, .. }
            | PlatformEvent::MemberLeft { community_id, .. }
            | PlatformEvent::RolesChanged { community_id, .. }
            | PlatformEvent::RoleDeleted { community_id, .. }
            | PlatformEvent::CommunityJoined { community_id }
            | PlatformEvent::CommunityLeft { community_id } => *community_id,
        }
    }
}

/// Reacts to platform events.
///
/// Handlers run each event on their own task, the returned future must therefore be `Send`.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: PlatformEvent) -> BoxFuture<'_, Result<(), WardenError>>;
}

pub type SharedHandler = Arc<dyn EventHandler>;

/// Source of platform events handlers can register at.
pub trait EventSource {
    fn subscribe(&self, kind: EventKind, handler: SharedHandler);

    /// Removes a handler again. Handlers are compared by identity.
    fn unsubscribe(&self, kind: EventKind, handler: &SharedHandler);
}

/// Registers a handler for every event kind.
pub fn subscribe_all<E>(source: &E, handler: SharedHandler)
where
    E: EventSource + ?Sized,
{
    for kind in EventKind::ALL {
        source.subscribe(kind, handler.clone());
    }
}

/// Removes a handler from every event kind.
pub fn unsubscribe_all<E>(source: &E, handler: &SharedHandler)
where
    E: EventSource + ?Sized,
{
    for kind in EventKind::ALL {
        source.unsubscribe(kind, handler);
    }
}

impl<S, P> EventHandler for Warden<S, P>
where
    S: WardenStore,
    P: Platform,
{
    fn handle(&self, event: PlatformEvent) -> BoxFuture<'_, Result<(), WardenError>> {
        async move {
            match event {
                PlatformEvent::MemberJoined {
                    community_id,
                    user_id,
                } => {
                    self.on_member_join(community_id, user_id).await?;
                }
                PlatformEvent::MemberLeft {
                    community_id,
                    user_id,
                } => {
                    self.on_member_left(community_id, user_id).await?;
                }
                PlatformEvent::RolesChanged {
                    community_id,
                    user_id,
                    old_roles,
                    new_roles,
                } => {
                    self.on_roles_changed(community_id, user_id, old_roles.as_ref(), &new_roles)
                        .await?;
                }
                PlatformEvent::RoleDeleted {
                    community_id,
                    role_id,
                } => {
                    self.on_role_deleted(community_id, role_id).await?;
                }
                PlatformEvent::CommunityJoined { community_id } => {
                    self.on_community_joined(community_id).await?;
                }
                PlatformEvent::CommunityLeft { community_id } => {
                    self.on_community_left(community_id).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}

/// In-process event source which runs every event on its own tokio task.
///
/// Failed events are logged and dropped, there is no re-delivery. The next state-changing event
/// of the same member restores consistency.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<SharedHandler>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers registered for this kind of event.
    pub fn handlers(&self, kind: EventKind) -> usize {
        match self.handlers.read() {
            Ok(handlers) => handlers.get(&kind).map_or(0, Vec::len),
            Err(poisoned) => poisoned.into_inner().get(&kind).map_or(0, Vec::len),
        }
    }

    /// Spawns one task per registered handler for this event and returns their handles.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: PlatformEvent) -> Vec<JoinHandle<()>> {
        let kind = event.kind();
        let handlers: Vec<SharedHandler> = match self.handlers.read() {
            Ok(handlers) => handlers.get(&kind).cloned().unwrap_or_default(),
            Err(poisoned) => poisoned
                .into_inner()
                .get(&kind)
                .cloned()
                .unwrap_or_default(),
        };

        if handlers.is_empty() {
            debug!(?kind, "no handler registered for event");
        }

        handlers
            .into_iter()
            .map(|handler| {
                let event = event.clone();
                tokio::spawn(async move {
                    let community_id = event.community_id();
                    if let Err(err) = handler.handle(event).await {
                        warn!(community = %community_id, ?kind, "handling event failed: {err}");
                    }
                })
            })
            .collect()
    }
}

impl EventSource for EventDispatcher {
    fn subscribe(&self, kind: EventKind, handler: SharedHandler) {
        let mut handlers = match self.handlers.write() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        handlers.entry(kind).or_default().push(handler);
    }

    fn unsubscribe(&self, kind: EventKind, handler: &SharedHandler) {
        let mut handlers = match self.handlers.write() {
            Ok(handlers) => handlers,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(registered) = handlers.get_mut(&kind) {
            registered.retain(|other| !ptr::addr_eq(Arc::as_ptr(other), Arc::as_ptr(handler)));
        }
    }
}
