// src/texture/registry.rs
//! Arena-backed, doubly-linked collection of live shared textures.
//!
//! Slots are addressed by `TextureId` (index + generation). Removal given an
//! id is O(1) and repairs both neighbours; iteration follows insertion order.
//! A removed slot's generation is bumped, so stale ids simply miss.

use super::SharedTexture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId {
    index: u32,
    generation: u32,
}

struct Node {
    texture: SharedTexture,
    prev: Option<u32>,
    next: Option<u32>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Default)]
pub struct TextureRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

impl TextureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links `texture` in at the tail.
    pub fn insert(&mut self, texture: SharedTexture) -> TextureId {
        let node = Node {
            texture,
            prev: self.tail,
            next: None,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                (self.slots.len() - 1) as u32
            }
        };
        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        TextureId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Unlinks and returns the texture for `id`; `None` for unknown or stale ids.
    pub fn remove(&mut self, id: TextureId) -> Option<SharedTexture> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.len -= 1;
        Some(node.texture)
    }

    /// Unlinks and returns the oldest texture.
    pub fn pop_front(&mut self) -> Option<(TextureId, SharedTexture)> {
        let id = self.first_id()?;
        self.remove(id).map(|texture| (id, texture))
    }

    pub fn contains(&self, id: TextureId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: TextureId) -> Option<&SharedTexture> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref().map(|n| &n.texture)
    }

    pub fn get_mut(&mut self, id: TextureId) -> Option<&mut SharedTexture> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut().map(|n| &mut n.texture)
    }

    pub fn first_id(&self) -> Option<TextureId> {
        self.head.map(|index| self.id_at(index))
    }

    /// The id linked after `id`; `None` at the tail or for stale ids.
    pub fn next_id(&self, id: TextureId) -> Option<TextureId> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let next = slot.node.as_ref()?.next?;
        Some(self.id_at(next))
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<TextureId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            cursor: self.head,
        }
    }

    /// Walks the list in both directions and checks every link agrees.
    pub fn is_consistent(&self) -> bool {
        let mut forward = Vec::with_capacity(self.len);
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let Some(node) = self.slots.get(index as usize).and_then(|s| s.node.as_ref()) else {
                return false;
            };
            if node.prev != prev || forward.len() > self.len {
                return false;
            }
            forward.push(index);
            prev = Some(index);
            cursor = node.next;
        }
        if prev != self.tail || forward.len() != self.len {
            return false;
        }

        let mut backward = Vec::with_capacity(self.len);
        let mut cursor = self.tail;
        while let Some(index) = cursor {
            let Some(node) = self.slots.get(index as usize).and_then(|s| s.node.as_ref()) else {
                return false;
            };
            backward.push(index);
            if backward.len() > self.len {
                return false;
            }
            cursor = node.prev;
        }
        backward.reverse();
        forward == backward
    }

    fn id_at(&self, index: u32) -> TextureId {
        TextureId {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn node_mut(&mut self, index: u32) -> &mut Node {
        match self.slots[index as usize].node.as_mut() {
            Some(node) => node,
            None => unreachable!("linked slot {} is empty", index),
        }
    }
}

pub struct Iter<'a> {
    registry: &'a TextureRegistry,
    cursor: Option<u32>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (TextureId, &'a SharedTexture);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let slot = &self.registry.slots[index as usize];
        let node = slot.node.as_ref()?;
        self.cursor = node.next;
        Some((
            TextureId {
                index,
                generation: slot.generation,
            },
            &node.texture,
        ))
    }
}
