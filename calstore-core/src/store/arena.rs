//! Slot arena with generational handles.

use crate::component::Component;

/// Address of a component in the [`Arena`]. A handle whose slot has been
/// freed and reused no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    value: Option<Component>,
}

#[derive(Default)]
pub struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    pub fn insert(&mut self, component: Component) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.value = Some(component);
            return Handle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(component),
        });
        Handle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&Component> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Component> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn remove(&mut self, handle: Handle) -> Option<Component> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)?;
        let value = slot.value.take()?;
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut arena = Arena::default();
        let first = arena.insert(Component::new("VEVENT"));
        assert!(arena.remove(first).is_some());

        let second = arena.insert(Component::new("VTODO"));
        assert_eq!(first.index, second.index, "Slot should be reused");
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second).map(|c| c.name.as_str()), Some("VTODO"));
        assert!(arena.remove(first).is_none());
        assert_eq!(arena.len(), 1);
    }
}
