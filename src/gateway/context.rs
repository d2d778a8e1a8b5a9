//! Current-database context
//!
//! Holds the database that calls without an explicit target connect to.
//! The value is owned by one gateway instance and shared with its broker.
//!
//! Concurrent switches are not serialized: the last switch to write wins.
//! A failed switch restores the previous name only if nothing else has
//! replaced its speculative value in the meantime.

use std::sync::RwLock;

/// The mutable "current database" of a gateway
#[derive(Debug)]
pub struct DatabaseContext {
    current: RwLock<String>,
}

impl DatabaseContext {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            current: RwLock::new(database.into()),
        }
    }

    /// Name of the current target database
    pub fn current(&self) -> String {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Resolve a call's target: the override when given, else the context
    pub fn resolve(&self, database: Option<&str>) -> String {
        match database {
            Some(name) => name.to_string(),
            None => self.current(),
        }
    }

    /// Set a new value, returning the one it replaced
    pub fn replace(&self, database: &str) -> String {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, database.to_string())
    }

    /// Put `previous` back if the context still holds `speculative`.
    ///
    /// Returns whether the restore happened.
    pub fn restore(&self, speculative: &str, previous: &str) -> bool {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == speculative {
            *guard = previous.to_string();
            true
        } else {
            false
        }
    }
}
