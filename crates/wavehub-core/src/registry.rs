//! StreamRegistry — arena + stable index (spec.md §9 redesign note)
//!
//! The original CRAS-family source links streams into the doubly-linked
//! lists pervasive in that codebase; here the registry is an owning vector
//! with a free list, so stream identity is a stable index rather than a
//! pointer, referenceable from the control thread, the audio thread's
//! commands, and alert callbacks without lifetime gymnastics. Grounded in
//! the index-based effect-registry idiom used elsewhere in this pack.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::stream::{Rstream, StreamId};

enum Slot {
    Occupied(Rstream),
    Free(Option<usize>),
}

/// Global map of `StreamId -> Rstream`, exclusively owned by the streams
/// registry (spec.md §3 "Ownership").
#[derive(Default)]
pub struct StreamRegistry {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    index_of: HashMap<StreamId, usize>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            index_of: HashMap::new(),
        }
    }

    pub fn insert(&mut self, stream: Rstream) -> usize {
        let id = stream.id;
        let idx = match self.free_head.take() {
            Some(idx) => {
                let next = match &self.slots[idx] {
                    Slot::Free(next) => *next,
                    Slot::Occupied(_) => unreachable!("free list points at occupied slot"),
                };
                self.free_head = next;
                self.slots[idx] = Slot::Occupied(stream);
                idx
            }
            None => {
                self.slots.push(Slot::Occupied(stream));
                self.slots.len() - 1
            }
        };
        self.index_of.insert(id, idx);
        idx
    }

    pub fn remove(&mut self, id: StreamId) -> CoreResult<Rstream> {
        let idx = self.index_of.remove(&id).ok_or(CoreError::StreamNotFound(id))?;
        let prior = std::mem::replace(&mut self.slots[idx], Slot::Free(self.free_head));
        self.free_head = Some(idx);
        match prior {
            Slot::Occupied(stream) => Ok(stream),
            Slot::Free(_) => unreachable!("index_of pointed at a free slot"),
        }
    }

    pub fn get(&self, id: StreamId) -> Option<&Rstream> {
        let idx = *self.index_of.get(&id)?;
        match &self.slots[idx] {
            Slot::Occupied(stream) => Some(stream),
            Slot::Free(_) => None,
        }
    }

    pub fn get_mut(&mut self, id: StreamId) -> Option<&mut Rstream> {
        let idx = *self.index_of.get(&id)?;
        match &mut self.slots[idx] {
            Slot::Occupied(stream) => Some(stream),
            Slot::Free(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.index_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_of.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rstream> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(stream) => Some(stream),
            Slot::Free(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavehub_proto::{AudioFormat, ChannelLayout, SampleFormat, StreamDirection, StreamFlags};
    use wavehub_shm::{ShmConfig, StreamShm};

    fn make_stream(id: StreamId) -> Rstream {
        let format = AudioFormat::new(SampleFormat::F32Le, 48000, 2, ChannelLayout::stereo()).unwrap();
        let shm = StreamShm::create(ShmConfig {
            frame_bytes: format.frame_bytes(),
            used_size: 4096,
            num_channels: 2,
            frame_rate: 48000,
            channel_layout: format.channel_layout,
        })
        .unwrap();
        Rstream {
            id,
            direction: StreamDirection::Playback,
            format,
            buffer_frames: 480,
            cb_threshold: 480,
            min_cb_level: 0,
            flags: StreamFlags::empty(),
            shm,
            next_cb_ts: 0,
            last_fetched_cb_ts: 0,
            audio_socket: None,
        }
    }

    #[test]
    fn insert_then_remove_leaves_registry_empty() {
        let mut registry = StreamRegistry::new();
        let id = StreamId::new(1, 1);
        registry.insert(make_stream(id));
        assert_eq!(registry.len(), 1);
        registry.remove(id).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut registry = StreamRegistry::new();
        let a = StreamId::new(1, 1);
        let b = StreamId::new(1, 2);
        let idx_a = registry.insert(make_stream(a));
        registry.remove(a).unwrap();
        let idx_b = registry.insert(make_stream(b));
        assert_eq!(idx_a, idx_b);
    }

    #[test]
    fn removing_unknown_stream_errors() {
        let mut registry = StreamRegistry::new();
        assert!(matches!(
            registry.remove(StreamId::new(9, 9)),
            Err(CoreError::StreamNotFound(_))
        ));
    }

    #[test]
    fn get_mut_allows_advancing_cb_ts() {
        let mut registry = StreamRegistry::new();
        let id = StreamId::new(1, 1);
        registry.insert(make_stream(id));
        registry.get_mut(id).unwrap().advance_next_cb_ts(48000);
        assert_eq!(registry.get(id).unwrap().next_cb_ts, 10_000_000);
    }
}
