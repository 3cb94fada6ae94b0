//! Fixed arena of connection slots split into a free set and an active set.

use crpc_common::ids::{ConnectionId, SlotCount, SlotIndex};
use socket2::Socket;

use super::connection::ServerConnection;

/// Connection records allocated once at server creation and reused forever after.
///
/// The free set is a LIFO stack. The active set has no meaningful order: releases swap the
/// last active slot into the vacated position.
#[derive(Debug)]
pub(super) struct SlotPool {
    slots: Vec<ServerConnection>,
    free: Vec<SlotIndex>,
    active: Vec<SlotIndex>,
}

impl SlotPool {
    pub(super) fn new(capacity: SlotCount, recv_buffer_bytes: usize) -> Self {
        let capacity = usize::from(capacity.get());
        Self {
            slots: (0..capacity)
                .map(|slot| ServerConnection::new(slot, recv_buffer_bytes))
                .collect(),
            // Reversed so slot 0 is handed out first.
            free: (0..capacity).rev().collect(),
            active: Vec::with_capacity(capacity),
        }
    }

    pub(super) fn has_free_slot(&self) -> bool {
        !self.free.is_empty()
    }

    pub(super) fn free_len(&self) -> usize {
        self.free.len()
    }

    pub(super) fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Slot index stored at `position` of the active set.
    pub(super) fn active_slot(&self, position: usize) -> SlotIndex {
        self.active[position]
    }

    pub(super) fn active_slots(&self) -> &[SlotIndex] {
        &self.active
    }

    pub(super) fn connection(&self, slot: SlotIndex) -> &ServerConnection {
        &self.slots[slot]
    }

    pub(super) fn connection_mut(&mut self, slot: SlotIndex) -> &mut ServerConnection {
        &mut self.slots[slot]
    }

    /// Moves one free slot into the active set, bound to `socket`.
    ///
    /// Returns `None` when every slot is in use; `socket` is dropped in that case.
    pub(super) fn acquire(&mut self, socket: Socket) -> Option<ConnectionId> {
        let slot = self.free.pop()?;
        let id = self.slots[slot].open(socket);
        self.active.push(slot);
        Some(id)
    }

    /// Resets the slot at `position` of the active set and returns it to the free set.
    pub(super) fn release(&mut self, position: usize) -> SlotIndex {
        let slot = self.active.swap_remove(position);
        self.slots[slot].reset();
        self.free.push(slot);
        slot
    }

    /// Closes every active socket without returning slots to the free set.
    pub(super) fn close_all(&mut self) {
        for &slot in &self.active {
            self.slots[slot].close();
        }
    }
}
