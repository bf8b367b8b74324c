//! Uniform buffers kept across frames.
//!
//! A slot's buffer is created once and rewritten in place with
//! `RenderQueue::write_buffer` while its byte size stays the same. Slots are
//! filled in index order each frame; [`UniformSlots::truncate`] drops the
//! ones no longer used.

use bevy::render::{
    render_resource::{Buffer, BufferInitDescriptor, BufferUsages},
    renderer::{RenderDevice, RenderQueue},
};

/// Outcome of [`UniformSlots::fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFill {
    Created,
    Rewritten,
}

#[derive(Debug)]
pub struct UniformSlots<B = Buffer> {
    slots: Vec<(u64, B)>,
}

impl<B> Default for UniformSlots<B> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<B: Clone> UniformSlots<B> {
    /// Reuse slot `index` when it holds `size` bytes, otherwise replace it.
    pub fn fill(
        &mut self,
        index: usize,
        size: u64,
        create: impl FnOnce() -> B,
        rewrite: impl FnOnce(&B),
    ) -> (B, SlotFill) {
        if let Some((slot_size, buffer)) = self.slots.get(index) {
            if *slot_size == size {
                rewrite(buffer);
                return (buffer.clone(), SlotFill::Rewritten);
            }
        }

        let buffer = create();
        if index < self.slots.len() {
            self.slots[index] = (size, buffer.clone());
        } else {
            debug_assert_eq!(index, self.slots.len(), "uniform slots are filled in order");
            self.slots.push((size, buffer.clone()));
        }
        (buffer, SlotFill::Created)
    }

    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl UniformSlots<Buffer> {
    /// Upload `contents` into slot `index`.
    pub fn upload(
        &mut self,
        index: usize,
        label: &'static str,
        contents: &[u8],
        render_device: &RenderDevice,
        render_queue: &RenderQueue,
    ) -> Buffer {
        let (buffer, _) = self.fill(
            index,
            contents.len() as u64,
            || {
                render_device.create_buffer_with_data(&BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                })
            },
            |buffer| render_queue.write_buffer(buffer, 0, contents),
        );
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_second_frame_rewrites_instead_of_creating() {
        let created = Cell::new(0u32);
        let rewritten = Cell::new(0u32);
        let mut slots = UniformSlots::<u32>::default();

        for _frame in 0..3 {
            for index in 0..4 {
                slots.fill(
                    index,
                    64,
                    || {
                        created.set(created.get() + 1);
                        created.get()
                    },
                    |_| rewritten.set(rewritten.get() + 1),
                );
            }
        }

        assert_eq!(created.get(), 4, "one buffer per slot across frames");
        assert_eq!(rewritten.get(), 8);
        assert_eq!(slots.len(), 4);
    }

    #[test]
    fn test_size_change_replaces_slot() {
        let mut slots = UniformSlots::<u32>::default();
        let (first, fill) = slots.fill(0, 16, || 1, |_| {});
        assert_eq!((first, fill), (1, SlotFill::Created));

        let (same, fill) = slots.fill(0, 16, || 2, |_| {});
        assert_eq!((same, fill), (1, SlotFill::Rewritten));

        let (resized, fill) = slots.fill(0, 32, || 3, |_| {});
        assert_eq!((resized, fill), (3, SlotFill::Created), "a resized slot gets a new buffer");
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn test_truncate_drops_unused_slots() {
        let mut slots = UniformSlots::<u32>::default();
        for index in 0..5 {
            slots.fill(index, 8, || index as u32, |_| {});
        }
        slots.truncate(2);
        assert_eq!(slots.len(), 2);

        let (buffer, fill) = slots.fill(2, 8, || 99, |_| {});
        assert_eq!((buffer, fill), (99, SlotFill::Created));
    }
}
