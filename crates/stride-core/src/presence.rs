use dashmap::DashMap;
use std::collections::HashSet;
use stride_models::presence::{Identity, PresenceSummary};
use uuid::Uuid;

struct PresenceEntry {
    identity: Identity,
    sessions: HashSet<Uuid>,
}

/// Source of truth for which identities are reachable over the live
/// transport. Entries are process-local and rebuilt from reconnects;
/// nothing here is ever persisted.
pub struct PresenceRegistry {
    entries: DashMap<i64, PresenceEntry>,
    /// Reverse index: session handle -> owning identity.
    sessions: DashMap<Uuid, i64>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Register or refresh a session under an identity. An identity may hold
    /// several simultaneous sessions (tabs, devices); re-authenticating the
    /// same handle replaces rather than appends.
    pub fn authenticate(&self, identity: Identity, session_id: Uuid) {
        if let Some(previous) = self.sessions.insert(session_id, identity.user_id) {
            if previous != identity.user_id {
                // Same transport session re-authenticated as someone else.
                self.detach_session(previous, session_id);
            }
        }

        let mut entry = self
            .entries
            .entry(identity.user_id)
            .or_insert_with(|| PresenceEntry {
                identity: identity.clone(),
                sessions: HashSet::new(),
            });
        // Refresh display name / contact on every authenticate.
        entry.identity = identity;
        entry.sessions.insert(session_id);
    }

    /// All currently reachable sessions for an identity; empty if offline.
    pub fn lookup(&self, user_id: i64) -> Vec<Uuid> {
        self.entries
            .get(&user_id)
            .map(|e| e.sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.entries.contains_key(&user_id)
    }

    /// Identity that authenticated the given session, if any.
    pub fn identity_of_session(&self, session_id: Uuid) -> Option<Identity> {
        let user_id = *self.sessions.get(&session_id)?;
        self.entries.get(&user_id).map(|e| e.identity.clone())
    }

    /// Drop a session on transport disconnect. Returns the identity together
    /// with whether this was its last session (the identity went offline).
    pub fn remove(&self, session_id: Uuid) -> Option<(Identity, bool)> {
        let (_, user_id) = self.sessions.remove(&session_id)?;
        self.detach_session(user_id, session_id)
    }

    fn detach_session(&self, user_id: i64, session_id: Uuid) -> Option<(Identity, bool)> {
        let mut entry = self.entries.get_mut(&user_id)?;
        entry.sessions.remove(&session_id);
        let identity = entry.identity.clone();
        let offline = entry.sessions.is_empty();
        drop(entry);
        if offline {
            self.entries.remove_if(&user_id, |_, e| e.sessions.is_empty());
        }
        Some((identity, offline))
    }

    /// Snapshot of everyone currently online, for presence UIs.
    pub fn list_online(&self) -> Vec<PresenceSummary> {
        self.entries
            .iter()
            .map(|e| PresenceSummary {
                user_id: e.identity.user_id,
                display_name: e.identity.display_name.clone(),
                contact: e.identity.contact.clone(),
                session_count: e.sessions.len(),
            })
            .collect()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
