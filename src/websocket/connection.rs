use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Conversations a connection receives events for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Conversations(HashSet<Uuid>),
}

impl Scope {
    pub fn from_ids(ids: Vec<Uuid>) -> Self {
        if ids.is_empty() {
            Scope::All
        } else {
            Scope::Conversations(ids.into_iter().collect())
        }
    }

    pub fn covers(&self, conversation_id: Uuid) -> bool {
        match self {
            Scope::All => true,
            Scope::Conversations(ids) => ids.contains(&conversation_id),
        }
    }

    pub fn ids(&self) -> Vec<Uuid> {
        match self {
            Scope::All => Vec::new(),
            Scope::Conversations(ids) => {
                let mut ids: Vec<Uuid> = ids.iter().copied().collect();
                ids.sort();
                ids
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid connection transition from {from} on {on}")]
pub struct TransitionError {
    pub from: &'static str,
    pub on: &'static str,
}

/// Lifecycle of one channel connection: connecting → authenticated → subscribed → closed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Authenticated {
        user_id: Uuid,
    },
    Subscribed {
        user_id: Uuid,
        scope: Scope,
    },
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated { .. } => "authenticated",
            ConnectionState::Subscribed { .. } => "subscribed",
            ConnectionState::Closed => "closed",
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            ConnectionState::Authenticated { user_id }
            | ConnectionState::Subscribed { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    pub fn authenticate(&mut self, user_id: Uuid) -> Result<(), TransitionError> {
        match self {
            ConnectionState::Connecting => {
                *self = ConnectionState::Authenticated { user_id };
                Ok(())
            }
            other => Err(TransitionError {
                from: other.name(),
                on: "auth",
            }),
        }
    }

    /// Valid once authenticated; a later subscribe replaces the scope
    pub fn subscribe(&mut self, scope: Scope) -> Result<(), TransitionError> {
        match self.user_id() {
            Some(user_id) => {
                *self = ConnectionState::Subscribed { user_id, scope };
                Ok(())
            }
            None => Err(TransitionError {
                from: self.name(),
                on: "subscribe",
            }),
        }
    }

    pub fn close(&mut self) {
        *self = ConnectionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let user = Uuid::new_v4();
        let mut state = ConnectionState::default();

        state.authenticate(user).unwrap();
        assert_eq!(state.user_id(), Some(user));

        state.subscribe(Scope::All).unwrap();
        let conversation = Uuid::new_v4();
        state
            .subscribe(Scope::from_ids(vec![conversation]))
            .unwrap();
        match &state {
            ConnectionState::Subscribed { scope, .. } => assert!(scope.covers(conversation)),
            other => panic!("unexpected state {other:?}"),
        }

        state.close();
        assert!(state.is_closed());
    }

    #[test]
    fn rejects_out_of_order_transitions() {
        let mut state = ConnectionState::default();
        assert!(state.subscribe(Scope::All).is_err());

        state.authenticate(Uuid::new_v4()).unwrap();
        assert!(state.authenticate(Uuid::new_v4()).is_err());

        state.close();
        assert!(state.authenticate(Uuid::new_v4()).is_err());
        assert!(state.subscribe(Scope::All).is_err());
    }

    #[test]
    fn scope_coverage() {
        let a = Uuid::new_v4();
        assert!(Scope::from_ids(vec![]).covers(a));
        assert!(Scope::from_ids(vec![a]).covers(a));
        assert!(!Scope::from_ids(vec![a]).covers(Uuid::new_v4()));
    }
}
