//! Client sessions. A session may carry one active transaction; SQL
//! mutations issued while it is active are queued into it.

use std::collections::HashMap;
use std::sync::Arc;

use keystone::transaction::Transaction;
use parking_lot::Mutex;

pub struct Session {
    pub id: String,
    pub transaction: Option<Transaction>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Session {
            id: id.into(),
            transaction: None,
        }
    }
}

/// Thread-safe registry of sessions by id.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Mutex<Session>> {
        let mut sessions = self.sessions.lock();
        Arc::clone(
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(id)))),
        )
    }

    pub fn delete(&self, id: &str) {
        self.sessions.lock().remove(id);
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        SessionManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_session() {
        let manager = SessionManager::new();
        let a = manager.get_or_create("alpha");
        let b = manager.get_or_create("alpha");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().id, "alpha");
    }

    #[test]
    fn deleted_sessions_are_recreated_fresh() {
        let manager = SessionManager::new();
        let a = manager.get_or_create("alpha");
        manager.delete("alpha");
        let b = manager.get_or_create("alpha");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
