// Name Registry - register-once, read-many component addressing
//
// An explicit object constructed at startup and passed by reference; there
// is no process-wide singleton. Lookup returns a clone of the stored
// reference, so readers never hold the lock across a send.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::debug;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Name already registered: {0}")]
    NameCollision(String),

    #[error("Name not found: {0}")]
    LookupFailure(String),
}

/// Shared name -> reference registry, generic over the reference type
pub struct SharedRegistry<A> {
    entries: RwLock<HashMap<String, A>>,
}

impl<A: Clone> SharedRegistry<A> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a reference under a unique name, returning a clone of it.
    ///
    /// # Errors
    /// - RegistryError::NameCollision if the name is already taken
    pub fn register(&self, name: &str, reference: A) -> Result<A, RegistryError> {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.contains_key(name) {
            return Err(RegistryError::NameCollision(name.to_string()));
        }
        entries.insert(name.to_string(), reference.clone());
        debug!(name = %name, "Registered");
        Ok(reference)
    }

    /// Look up a registered reference by name.
    ///
    /// # Errors
    /// - RegistryError::LookupFailure if the name was never registered
    pub fn lookup(&self, name: &str) -> Result<A, RegistryError> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::LookupFailure(name.to_string()))
    }

    /// Registered names (diagnostics)
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

impl<A: Clone> Default for SharedRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_lookup() {
        let registry = SharedRegistry::new();
        registry.register("worker", 42u32).unwrap();
        assert_eq!(registry.lookup("worker").unwrap(), 42);
    }

    #[test]
    fn test_register_twice_is_collision() {
        let registry = SharedRegistry::new();
        registry.register("worker", 1u32).unwrap();
        let err = registry.register("worker", 2u32).unwrap_err();
        assert!(matches!(err, RegistryError::NameCollision(_)));
        // First registration is untouched
        assert_eq!(registry.lookup("worker").unwrap(), 1);
    }

    #[test]
    fn test_lookup_unknown_name_fails() {
        let registry: SharedRegistry<u32> = SharedRegistry::new();
        let err = registry.lookup("ghost").unwrap_err();
        assert!(matches!(err, RegistryError::LookupFailure(_)));
    }

    #[test]
    fn test_concurrent_lookups() {
        use std::sync::Arc;

        let registry = Arc::new(SharedRegistry::new());
        registry.register("shared", 7u32).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.lookup("shared").unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
    }
}
