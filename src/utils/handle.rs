use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Generational key into a [`Pool`].
///
/// A handle stays valid until the slot it points at is released or renewed;
/// after that the generation no longer matches and lookups return `None`.
pub struct Handle<T> {
    pub slot: u32,
    pub generation: u32,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub fn new(slot: u32, generation: u32) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

/// Growable slot arena with per-slot generations.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u32>,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        const INITIAL_SIZE: usize = 16;
        Self::new(INITIAL_SIZE)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            empty: Vec::with_capacity(initial_size),
            generation: vec![0; initial_size],
        };

        // Reversed so slots are handed out lowest first.
        p.empty = (0..initial_size).rev().collect();
        p.items.resize_with(initial_size, || None);

        p
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                self.items.push(None);
                self.generation.push(0);
                self.items.len() - 1
            }
        };

        self.items[slot] = Some(item);
        Handle::new(slot as u32, self.generation[slot])
    }

    /// Removes the item, invalidating every outstanding handle to it.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        if !self.is_valid(item) {
            return None;
        }

        let slot = item.slot as usize;
        let value = self.items[slot].take();
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        self.empty.push(slot);
        value
    }

    /// Keeps the item in place but invalidates every outstanding handle,
    /// returning the fresh one.
    pub fn renew(&mut self, item: Handle<T>) -> Option<Handle<T>> {
        if !self.is_valid(item) {
            return None;
        }

        let slot = item.slot as usize;
        self.generation[slot] = self.generation[slot].wrapping_add(1);
        Some(Handle::new(item.slot, self.generation[slot]))
    }

    pub fn is_valid(&self, item: Handle<T>) -> bool {
        let slot = item.slot as usize;
        slot < self.items.len()
            && self.generation[slot] == item.generation
            && self.items[slot].is_some()
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        if self.is_valid(item) {
            self.items[item.slot as usize].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        if self.is_valid(item) {
            self.items[item.slot as usize].as_mut()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.items.len() - self.empty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every item, handing each one to `func`.
    pub fn drain<F>(&mut self, mut func: F)
    where
        F: FnMut(T),
    {
        for slot in 0..self.items.len() {
            if let Some(item) = self.items[slot].take() {
                self.generation[slot] = self.generation[slot].wrapping_add(1);
                self.empty.push(slot);
                func(item);
            }
        }
    }
}
