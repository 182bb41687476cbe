use crate::quantize::AccuracyLevel;

struct Slot<G> {
    generation: u64,
    levels: [Option<G>; 3],
}

/// Binding objects (bind groups, descriptor sets) memoized per batch and
/// level of detail. An entry is rebuilt only when the batch's device
/// generation moves on.
pub struct BindingCache<G> {
    slots: Vec<Option<Slot<G>>>,
}

impl<G> Default for BindingCache<G> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<G> BindingCache<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(
        &mut self,
        batch_id: u32,
        generation: u64,
        level: AccuracyLevel,
        build: impl FnOnce() -> G,
    ) -> &G {
        let index = batch_id as usize;
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }

        let slot = self.slots[index].get_or_insert_with(|| Slot {
            generation,
            levels: [None, None, None],
        });
        if slot.generation != generation {
            *slot = Slot {
                generation,
                levels: [None, None, None],
            };
        }

        slot.levels[level.index()].get_or_insert_with(build)
    }

    /// Entry built for exactly this generation, if any.
    pub fn get(&self, batch_id: u32, generation: u64, level: AccuracyLevel) -> Option<&G> {
        self.slots
            .get(batch_id as usize)?
            .as_ref()
            .filter(|slot| slot.generation == generation)?
            .levels[level.index()]
            .as_ref()
    }

    pub fn invalidate(&mut self, batch_id: u32) {
        if let Some(slot) = self.slots.get_mut(batch_id as usize) {
            *slot = None;
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of built entries across all batches and levels.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.levels.iter().filter(|g| g.is_some()).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
