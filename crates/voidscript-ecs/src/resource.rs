//! Type-keyed singleton storage.
//!
//! Resources are values that belong to the application rather than to any
//! entity: the frame clock, an audio context, a physics world. At most one
//! value per Rust type is stored.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Resources keyed by their Rust type.
#[derive(Default)]
pub struct Resources {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, dropping any previous value of the same type.
    pub fn insert<R: Send + Sync + 'static>(&mut self, value: R) {
        self.values.insert(TypeId::of::<R>(), Box::new(value));
    }

    /// Shared access to the `R` resource, if present.
    pub fn get<R: Send + Sync + 'static>(&self) -> Option<&R> {
        self.values.get(&TypeId::of::<R>())?.downcast_ref::<R>()
    }

    /// Exclusive access to the `R` resource, if present.
    pub fn get_mut<R: Send + Sync + 'static>(&mut self) -> Option<&mut R> {
        self.values.get_mut(&TypeId::of::<R>())?.downcast_mut::<R>()
    }

    /// Take the `R` resource out, returning it.
    pub fn remove<R: Send + Sync + 'static>(&mut self) -> Option<R> {
        self.values
            .remove(&TypeId::of::<R>())?
            .downcast::<R>()
            .ok()
            .map(|boxed| *boxed)
    }

    /// Whether an `R` resource is present.
    pub fn contains<R: Send + Sync + 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<R>())
    }

    /// Number of stored resources.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources").field("count", &self.values.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Gravity(f32);

    #[test]
    fn insert_replaces_previous_value() {
        let mut res = Resources::new();
        res.insert(Gravity(9.8));
        res.insert(Gravity(1.6));
        assert_eq!(res.get::<Gravity>(), Some(&Gravity(1.6)));
        assert_eq!(res.len(), 1);
    }

    #[test]
    fn types_are_independent() {
        let mut res = Resources::new();
        res.insert(Gravity(9.8));
        res.insert(3usize);
        if let Some(n) = res.get_mut::<usize>() {
            *n += 1;
        }
        assert_eq!(res.get::<usize>(), Some(&4));
        assert_eq!(res.remove::<Gravity>(), Some(Gravity(9.8)));
        assert!(!res.contains::<Gravity>());
        assert!(res.contains::<usize>());
    }
}
