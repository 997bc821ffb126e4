//! C7: storage manager (spec §4.7). Operates directly on one in-RAM byte
//! image laid out exactly as the data map spec describes, the way
//! `pbsys_storage_data_map_t` is a single struct overlaid onto block-device
//! memory in `storage.c` — this module ports `pbsys_storage_prepare_receive`
//! / `_set_program_size` / `_set_program_data` byte-for-byte rather than
//! re-deriving the shift-left compaction from scratch.

use crate::config::{NUM_SLOTS, PROGRAM_DATA_SIZE, USER_DATA_SIZE};
use crate::error::{PbioError, PbioResult};
use crate::hal::BlockDevice;

pub const HASH_SIZE: usize = 16;
const SETTINGS_SIZE: usize = 8;
const SLOT_ENTRY_SIZE: usize = 8;
const SLOT_TABLE_SIZE: usize = NUM_SLOTS * SLOT_ENTRY_SIZE;

const HASH_OFFSET: usize = 0;
const SETTINGS_OFFSET: usize = HASH_OFFSET + HASH_SIZE;
const USER_DATA_OFFSET: usize = SETTINGS_OFFSET + SETTINGS_SIZE;
const SLOT_TABLE_OFFSET: usize = USER_DATA_OFFSET + USER_DATA_SIZE;
const PROGRAM_DATA_OFFSET: usize = SLOT_TABLE_OFFSET + SLOT_TABLE_SIZE;

/// Total size of the data map, header plus program data region. Exposed for
/// [`crate::hal::fakes::FakeBlockDevice`]'s backing store.
pub const MAP_SIZE: usize = PROGRAM_DATA_OFFSET + PROGRAM_DATA_SIZE;

fn slot_offset(slot: usize) -> usize {
    SLOT_TABLE_OFFSET + slot * SLOT_ENTRY_SIZE
}

/// Storage manager. Owns the whole data map as one flat byte array and
/// exposes typed views over it, rather than a parsed/re-serialized copy, so
/// the shift-left compaction below can `copy_within` the image directly.
pub struct StorageManager {
    data: [u8; MAP_SIZE],
    incoming_slot: usize,
    dirty: bool,
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            data: [0u8; MAP_SIZE],
            incoming_slot: 0,
            dirty: false,
        }
    }

    pub fn firmware_hash(&self) -> &[u8; HASH_SIZE] {
        self.data[HASH_OFFSET..HASH_OFFSET + HASH_SIZE].try_into().unwrap()
    }

    pub fn ble_enabled(&self) -> bool {
        self.data[SETTINGS_OFFSET] != 0
    }

    pub fn set_ble_enabled(&mut self, enabled: bool) {
        self.data[SETTINGS_OFFSET] = enabled as u8;
        self.request_write();
    }

    pub fn user_data(&self) -> &[u8] {
        &self.data[USER_DATA_OFFSET..USER_DATA_OFFSET + USER_DATA_SIZE]
    }

    /// Spec §4.7 boundary: writes beyond `user_data`'s bound are rejected.
    pub fn set_user_data(&mut self, offset: usize, bytes: &[u8]) -> PbioResult<()> {
        if offset + bytes.len() > USER_DATA_SIZE {
            return Err(PbioError::InvalidArgument);
        }
        self.data[USER_DATA_OFFSET + offset..USER_DATA_OFFSET + offset + bytes.len()]
            .copy_from_slice(bytes);
        self.request_write();
        Ok(())
    }

    pub fn slot_info(&self, slot: usize) -> (u32, u32) {
        let o = slot_offset(slot);
        let offset = u32::from_le_bytes(self.data[o..o + 4].try_into().unwrap());
        let size = u32::from_le_bytes(self.data[o + 4..o + 8].try_into().unwrap());
        (offset, size)
    }

    fn set_slot_info(&mut self, slot: usize, offset: u32, size: u32) {
        let o = slot_offset(slot);
        self.data[o..o + 4].copy_from_slice(&offset.to_le_bytes());
        self.data[o + 4..o + 8].copy_from_slice(&size.to_le_bytes());
    }

    pub fn used_program_data_size(&self) -> u32 {
        (0..NUM_SLOTS).map(|s| self.slot_info(s).1).sum()
    }

    fn program_data_mut(&mut self) -> &mut [u8] {
        &mut self.data[PROGRAM_DATA_OFFSET..]
    }

    pub fn program_slice(&self, slot: usize) -> &[u8] {
        let (offset, size) = self.slot_info(slot);
        let start = PROGRAM_DATA_OFFSET + offset as usize;
        &self.data[start..start + size as usize]
    }

    /// Marks the image dirty so [`Self::shutdown`] writes it back.
    pub fn request_write(&mut self) {
        self.dirty = true;
    }

    /// Loads the whole map from the block device; if the stored firmware
    /// hash doesn't match the running one, resets to defaults (spec §4.7
    /// "Boot").
    pub fn boot(&mut self, dev: &mut impl BlockDevice, running_firmware_hash: [u8; HASH_SIZE]) -> PbioResult<()> {
        dev.get_data(&mut self.data)?;
        if self.firmware_hash() != &running_firmware_hash {
            self.reset_to_defaults(running_firmware_hash);
        }
        Ok(())
    }

    /// Erases settings, user data, and slot metadata; leaves program bytes
    /// in place since zero-size slots already make them unreachable
    /// (`pbsys_storage_reset_storage`).
    fn reset_to_defaults(&mut self, running_firmware_hash: [u8; HASH_SIZE]) {
        for b in &mut self.data[HASH_OFFSET..PROGRAM_DATA_OFFSET] {
            *b = 0;
        }
        self.data[HASH_OFFSET..HASH_OFFSET + HASH_SIZE].copy_from_slice(&running_firmware_hash);
        self.incoming_slot = 0;
        self.request_write();
    }

    /// `pbsys_storage_prepare_receive`: frees `selected_slot`'s space,
    /// shifting any later slots left to close the gap, and points the slot
    /// at the end of the now-used region, ready to receive.
    fn prepare_receive(&mut self, selected_slot: usize) {
        self.incoming_slot = selected_slot;
        let used_before = self.used_program_data_size();
        let (slot_offset_val, slot_size) = self.slot_info(selected_slot);
        let used_after = used_before - slot_size;

        let is_last = slot_offset_val == used_after;
        let is_empty = slot_size == 0;
        if is_empty || is_last {
            self.set_slot_info(selected_slot, used_after, 0);
            return;
        }

        let remaining_offset_before = slot_offset_val + slot_size;
        let remaining_size = used_before - remaining_offset_before;
        let gap = slot_size;
        let destination = slot_offset_val;
        let source = destination + gap;

        for slot in 0..NUM_SLOTS {
            let (o, s) = self.slot_info(slot);
            if o >= remaining_offset_before {
                self.set_slot_info(slot, o - gap, s);
            }
        }

        self.program_data_mut()
            .copy_within(source as usize..(source + remaining_size) as usize, destination as usize);

        self.set_slot_info(selected_slot, used_after, 0);
    }

    /// `pbsys_storage_set_program_size`. `new_size == 0` starts a receive by
    /// clearing/compacting the selected slot; any other value commits the
    /// just-written byte count to the slot already cleared by a prior
    /// `new_size == 0` call (testable property #3, spec §8: `slot[k].size`
    /// equals the final meta value exactly, so unlike upstream this does not
    /// round up to a word boundary).
    pub fn set_program_size(&mut self, selected_slot: usize, new_size: u32, program_running: bool) -> PbioResult<()> {
        if program_running {
            return Err(PbioError::Busy);
        }
        if new_size == 0 {
            self.prepare_receive(selected_slot);
            return Ok(());
        }
        if self.incoming_slot >= NUM_SLOTS || self.slot_info(self.incoming_slot).1 != 0 {
            return Err(PbioError::Failed);
        }
        let (offset, _) = self.slot_info(self.incoming_slot);
        self.set_slot_info(self.incoming_slot, offset, new_size);
        self.request_write();
        Ok(())
    }

    /// `pbsys_storage_set_program_data`: writes into the incoming slot's
    /// reserved region at `offset`.
    pub fn set_program_data(&mut self, offset: u32, data: &[u8], program_running: bool) -> PbioResult<()> {
        if program_running {
            return Err(PbioError::Busy);
        }
        let (slot_offset_val, _) = self.slot_info(self.incoming_slot);
        let start = slot_offset_val as usize + offset as usize;
        if start + data.len() > PROGRAM_DATA_SIZE {
            return Err(PbioError::InvalidArgument);
        }
        self.program_data_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Writes the used region (header + Σ slot sizes) back to the block
    /// device if anything changed since boot (spec §4.7 "Shutdown").
    pub fn shutdown(&mut self, dev: &mut impl BlockDevice) -> PbioResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let write_size = PROGRAM_DATA_OFFSET + self.used_program_data_size() as usize;
        dev.write_all(&self.data[..write_size])?;
        self.dirty = false;
        Ok(())
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fakes::FakeBlockDevice;

    fn fresh_with_slots(slots: &[(u32, u32)]) -> StorageManager {
        let mut mgr = StorageManager::new();
        mgr.data[HASH_OFFSET..HASH_OFFSET + HASH_SIZE].copy_from_slice(&[7u8; HASH_SIZE]);
        for (i, &(offset, size)) in slots.iter().enumerate() {
            mgr.set_slot_info(i, offset, size);
        }
        mgr
    }

    #[test]
    fn boot_resets_on_firmware_hash_mismatch() {
        let mut dev = FakeBlockDevice {
            storage: heapless::Vec::new(),
        };
        dev.storage.extend_from_slice(&[0xAAu8; MAP_SIZE]).ok();
        let mut mgr = StorageManager::new();
        mgr.boot(&mut dev, [1u8; HASH_SIZE]).unwrap();
        assert_eq!(mgr.firmware_hash(), &[1u8; HASH_SIZE]);
        assert_eq!(mgr.slot_info(0), (0, 0));
    }

    #[test]
    fn multi_slot_program_swap_matches_scenario_5() {
        // Scenario 5 (spec §8): slots [(0,100),(100,200),(300,50)], selected
        // slot 1, after write_meta(0) -> write_ram(0, 80) -> write_meta(80),
        // the table (sorted by offset) is [(0,100),(100,50),(150,80)] and
        // the 80 bytes land at program_data[150..230].
        let mut mgr = fresh_with_slots(&[(0, 100), (100, 200), (300, 50)]);
        // Seed slot 2's bytes so the shift is observable.
        let marker = [0x5Au8; 50];
        mgr.program_data_mut()[300..350].copy_from_slice(&marker);

        mgr.set_program_size(1, 0, false).unwrap();
        assert_eq!(mgr.slot_info(1), (150, 0));
        assert_eq!(mgr.slot_info(2), (100, 50));
        assert_eq!(&mgr.program_slice(2), &marker[..]);

        let payload = [0x11u8; 80];
        mgr.set_program_data(0, &payload, false).unwrap();
        mgr.set_program_size(1, 80, false).unwrap();

        assert_eq!(mgr.slot_info(0), (0, 100));
        assert_eq!(mgr.slot_info(1), (150, 80));
        assert_eq!(mgr.slot_info(2), (100, 50));
        assert_eq!(mgr.program_slice(1), &payload[..]);
        assert_eq!(&mgr.data[PROGRAM_DATA_OFFSET + 150..PROGRAM_DATA_OFFSET + 230], &payload[..]);
    }

    #[test]
    fn write_while_running_is_busy() {
        let mut mgr = fresh_with_slots(&[(0, 0), (0, 0)]);
        assert_eq!(mgr.set_program_size(0, 0, true), Err(PbioError::Busy));
    }

    #[test]
    fn testable_property_3_final_size_and_bytes_match() {
        let mut mgr = fresh_with_slots(&[(0, 0)]);
        mgr.set_program_size(0, 0, false).unwrap();
        let bytes = [0x42u8; 10];
        mgr.set_program_data(0, &bytes, false).unwrap();
        mgr.set_program_size(0, 10, false).unwrap();
        assert_eq!(mgr.slot_info(0).1, 10);
        assert_eq!(&mgr.program_slice(0)[..10], &bytes[..]);
    }
}
