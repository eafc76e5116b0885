//! In-memory HECI controller for testing.
//!
//! `MockHeci` models the register window of one HECI function together with
//! the ME side of the protocol: it consumes host frames when the doorbell
//! rings, answers complete requests from a queue of canned responses and
//! pushes response frames into the ME ring as space allows.
//!
//! Ring depths should be powers of two so that slot indexing stays
//! consistent when the 8-bit cursors wrap.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{HeciRegisters, PciAddress, PciConfigSpace};
use crate::message::Message;
use crate::protocol::constants::*;
use crate::protocol::{HeciCsr, HeciMessageHeader};
use crate::ring::CircularBufferPointers;

#[derive(Debug)]
struct Ring {
    slots: Vec<u32>,
    read: u8,
    write: u8,
}

impl Ring {
    fn new(depth: u8) -> Self {
        Self {
            slots: vec![0; depth as usize],
            read: 0,
            write: 0,
        }
    }

    fn pointers(&self) -> CircularBufferPointers {
        CircularBufferPointers::new(self.read, self.write, self.slots.len() as u8)
    }

    fn push(&mut self, word: u32) -> bool {
        let ptrs = self.pointers();
        if ptrs.check_room(1).is_err() {
            return false;
        }
        let index = ptrs.slot_index(self.write);
        self.slots[index] = word;
        self.write = ptrs.advance_write(1).write_pointer;
        true
    }

    fn peek(&self, offset: usize) -> Option<u32> {
        let ptrs = self.pointers();
        if offset >= ptrs.filled_slots() as usize || ptrs.is_overflowed() {
            return None;
        }
        Some(self.slots[ptrs.slot_index(self.read.wrapping_add(offset as u8))])
    }

    fn pop(&mut self) -> Option<u32> {
        let word = self.peek(0)?;
        self.read = self.pointers().advance_read(1).read_pointer;
        Some(word)
    }

    fn reset(&mut self) {
        self.read = 0;
        self.write = 0;
    }
}

#[derive(Debug)]
struct ControllerState {
    present: bool,
    host_ring: Ring,
    me_ring: Ring,
    host_flags: u32,
    me_flags: u32,
    /// Peer drains the host ring on every doorbell.
    auto_consume: bool,
    /// Canned responses, one per complete request.
    responses: VecDeque<Message>,
    /// Response frames not yet placed in the ME ring.
    pending_frames: VecDeque<Vec<u32>>,
    /// Peer-side reassembly of the current request.
    assembly: Vec<u8>,
    received: Vec<Message>,
    frame_log: Vec<HeciMessageHeader>,
    doorbells: usize,
    dropped_writes: usize,
}

impl ControllerState {
    fn frame_payload_limit(&self) -> usize {
        let depth = self.me_ring.slots.len();
        (depth.saturating_sub(1) * 4).min(HECI_MAX_FRAME_LENGTH & !0x3)
    }

    fn enqueue_message(&mut self, message: &Message, me_address: u8, host_address: u8) {
        let bytes = message.to_bytes();
        let limit = self.frame_payload_limit().max(4);
        let chunks: Vec<&[u8]> = bytes.chunks(limit).collect();
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let header = HeciMessageHeader::from_raw(
                me_address as u32
                    | (host_address as u32) << 8
                    | (chunk.len() as u32) << 16
                    | if i == last { 1 << 31 } else { 0 },
            );
            let mut frame = vec![header.raw()];
            frame.extend_from_slice(Message::from_bytes(chunk).words());
            self.pending_frames.push_back(frame);
        }
        self.fill_me_ring();
    }

    fn fill_me_ring(&mut self) {
        while let Some(frame) = self.pending_frames.front() {
            let room = self.me_ring.pointers().empty_slots().unwrap_or(0) as usize;
            if frame.len() > room {
                break;
            }
            for &word in frame {
                self.me_ring.push(word);
            }
            self.pending_frames.pop_front();
            self.host_flags |= CSR_IS;
        }
    }

    fn consume_host_ring(&mut self) {
        loop {
            let Some(raw) = self.host_ring.peek(0) else {
                break;
            };
            let header = HeciMessageHeader::from_raw(raw);
            let words = header.length_in_dwords();
            let available = self.host_ring.pointers().filled_slots() as usize;
            if available < words + 1 {
                break;
            }
            self.host_ring.pop();
            let mut payload = Vec::with_capacity(words);
            for _ in 0..words {
                payload.extend(self.host_ring.pop().unwrap_or_default().to_le_bytes());
            }
            payload.truncate(header.length());
            self.assembly.extend(payload);
            self.frame_log.push(header);

            if header.message_complete() {
                let request = Message::from_bytes(&self.assembly);
                self.assembly.clear();
                self.received.push(request);
                if let Some(response) = self.responses.pop_front() {
                    self.enqueue_message(&response, header.me_address(), header.host_address());
                }
            }
        }
        self.me_flags |= CSR_IS;
    }

    fn write_host_csr(&mut self, value: u32) {
        if value & CSR_IS != 0 {
            self.host_flags &= !CSR_IS;
        }
        let was_reset = self.host_flags & CSR_RST != 0;
        let control = CSR_IE | CSR_RDY | CSR_RST;
        self.host_flags = (self.host_flags & CSR_IS) | (value & control);

        let in_reset = value & CSR_RST != 0;
        if in_reset && !was_reset {
            self.host_ring.reset();
            self.me_ring.reset();
            self.pending_frames.clear();
            self.assembly.clear();
            self.host_flags &= !CSR_RDY;
            self.me_flags &= !CSR_RDY;
        }

        if value & CSR_IG == 0 {
            return;
        }
        self.doorbells += 1;
        if in_reset {
            return;
        }
        if self.me_flags & CSR_RDY == 0 {
            self.me_flags |= CSR_RDY;
            return;
        }
        if self.auto_consume {
            self.consume_host_ring();
        }
        self.fill_me_ring();
    }
}

/// Simulated HECI function for unit testing the transport.
///
/// Clones share state, so a test can keep a handle while the transport owns
/// another.
#[derive(Debug, Clone)]
pub struct MockHeci {
    state: Arc<Mutex<ControllerState>>,
}

impl MockHeci {
    /// Controller with equal host and ME ring depths.
    pub fn new(depth: u8) -> Self {
        Self::with_depths(depth, depth)
    }

    pub fn with_depths(host_depth: u8, me_depth: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(ControllerState {
                present: true,
                host_ring: Ring::new(host_depth),
                me_ring: Ring::new(me_depth),
                host_flags: CSR_RDY,
                me_flags: CSR_RDY,
                auto_consume: true,
                responses: VecDeque::new(),
                pending_frames: VecDeque::new(),
                assembly: Vec::new(),
                received: Vec::new(),
                frame_log: Vec::new(),
                doorbells: 0,
                dropped_writes: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a response to answer the next complete request.
    pub fn queue_response(&self, response: Message) {
        self.state().responses.push_back(response);
    }

    /// Push an unsolicited (or late) message into the ME ring.
    pub fn inject_response(&self, response: &Message, me_address: u8, host_address: u8) {
        self.state().enqueue_message(response, me_address, host_address);
    }

    /// Push raw dwords into the ME ring without framing them.
    ///
    /// Lets tests build partial or malformed frames.
    pub fn inject_raw_words(&self, words: &[u32]) {
        let mut state = self.state();
        for &word in words {
            if !state.me_ring.push(word) {
                break;
            }
        }
        state.host_flags |= CSR_IS;
    }

    /// Requests reassembled by the peer, oldest first.
    pub fn received_messages(&self) -> Vec<Message> {
        self.state().received.clone()
    }

    /// Framing headers of every frame the peer consumed.
    pub fn received_frames(&self) -> Vec<HeciMessageHeader> {
        self.state().frame_log.clone()
    }

    pub fn doorbell_count(&self) -> usize {
        self.state().doorbells
    }

    /// Host writes that hit a full ring.
    pub fn dropped_writes(&self) -> usize {
        self.state().dropped_writes
    }

    /// Simulate the function disappearing from the bus.
    pub fn set_present(&self, present: bool) {
        self.state().present = present;
    }

    pub fn set_me_ready(&self, ready: bool) {
        let mut state = self.state();
        if ready {
            state.me_flags |= CSR_RDY;
        } else {
            state.me_flags &= !CSR_RDY;
        }
    }

    pub fn set_host_ready(&self, ready: bool) {
        let mut state = self.state();
        if ready {
            state.host_flags |= CSR_RDY;
        } else {
            state.host_flags &= !CSR_RDY;
        }
    }

    /// Stop (or resume) draining the host ring on doorbell.
    pub fn set_auto_consume(&self, enabled: bool) {
        self.state().auto_consume = enabled;
    }

    /// Let the peer drain the host ring now.
    pub fn consume_host_ring(&self) {
        let mut state = self.state();
        state.consume_host_ring();
        state.fill_me_ring();
    }

    /// Force the host ring cursors.
    pub fn set_host_pointers(&self, read: u8, write: u8) {
        let mut state = self.state();
        state.host_ring.read = read;
        state.host_ring.write = write;
    }

    /// Force the ME ring cursors.
    pub fn set_me_pointers(&self, read: u8, write: u8) {
        let mut state = self.state();
        state.me_ring.read = read;
        state.me_ring.write = write;
    }

    pub fn host_pointers(&self) -> CircularBufferPointers {
        self.state().host_ring.pointers()
    }

    pub fn me_pointers(&self) -> CircularBufferPointers {
        self.state().me_ring.pointers()
    }

    /// Raw host ring storage.
    pub fn host_ring_slots(&self) -> Vec<u32> {
        self.state().host_ring.slots.clone()
    }

    /// Words sitting in the host ring, oldest first.
    pub fn host_ring_contents(&self) -> Vec<u32> {
        let state = self.state();
        let filled = state.host_ring.pointers().filled_slots() as usize;
        (0..filled).filter_map(|i| state.host_ring.peek(i)).collect()
    }

    /// Words in the ME ring plus response frames still waiting for room.
    pub fn pending_me_words(&self) -> usize {
        let state = self.state();
        let in_ring = state.me_ring.pointers().filled_slots() as usize;
        in_ring + state.pending_frames.iter().map(Vec::len).sum::<usize>()
    }
}

impl HeciRegisters for MockHeci {
    fn read32(&self, offset: u32) -> u32 {
        let mut state = self.state();
        if !state.present {
            return REGISTER_ABSENT;
        }
        match offset {
            H_CSR => {
                let ptrs = state.host_ring.pointers();
                HeciCsr::compose(state.host_flags, ptrs.read_pointer, ptrs.write_pointer, ptrs.depth)
                    .raw()
            }
            ME_CSR_HA => {
                let ptrs = state.me_ring.pointers();
                HeciCsr::compose(state.me_flags, ptrs.read_pointer, ptrs.write_pointer, ptrs.depth)
                    .raw()
            }
            ME_CB_RW => state.me_ring.pop().unwrap_or_default(),
            _ => 0,
        }
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut state = self.state();
        if !state.present {
            return;
        }
        match offset {
            H_CB_WW => {
                if !state.host_ring.push(value) {
                    state.dropped_writes += 1;
                }
            }
            H_CSR => state.write_host_csr(value),
            _ => {}
        }
    }
}

/// In-memory PCI configuration space.
///
/// Unpopulated functions read back as all ones.
#[derive(Debug, Clone, Default)]
pub struct MockPciConfig {
    space: Arc<Mutex<HashMap<(PciAddress, u16), u32>>>,
}

impl MockPciConfig {
    /// Offset of the PM capability placed by `add_heci_function`.
    pub const PM_CAP_OFFSET: u16 = 0x50;

    pub fn new() -> Self {
        Self::default()
    }

    fn space(&self) -> MutexGuard<'_, HashMap<(PciAddress, u16), u32>> {
        self.space.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Populate a HECI function powered down in D3hot with decode disabled.
    pub fn add_heci_function(&self, address: PciAddress, device_id: u16, bar: u64) {
        let mut space = self.space();
        for offset in (0..0x100).step_by(4) {
            space.insert((address, offset), 0);
        }
        space.insert(
            (address, PCI_VENDOR_ID_OFFSET),
            INTEL_VENDOR_ID as u32 | (device_id as u32) << 16,
        );
        space.insert(
            (address, PCI_COMMAND_OFFSET),
            (PCI_STATUS_CAPABILITY_LIST as u32) << 16,
        );
        space.insert(
            (address, PCI_BAR0_OFFSET),
            (bar as u32 & !(PCI_BAR_ATTR_MASK as u32)) | PCI_BAR_TYPE_64BIT,
        );
        space.insert((address, PCI_BAR1_OFFSET), (bar >> 32) as u32);
        space.insert(
            (address, PCI_CAPABILITY_PTR_OFFSET),
            Self::PM_CAP_OFFSET as u32,
        );
        space.insert((address, Self::PM_CAP_OFFSET), PCI_CAP_ID_PM as u32);
        space.insert((address, Self::PM_CAP_OFFSET + PCI_PM_CSR_OFFSET), 0x0003);
    }

    /// Set the HFSTS1 register of a populated function.
    pub fn set_fw_status(&self, address: PciAddress, value: u32) {
        self.space().insert((address, HECI_FWSTS1_OFFSET), value);
    }
}

impl PciConfigSpace for MockPciConfig {
    fn read32(&self, address: PciAddress, offset: u16) -> u32 {
        self.space()
            .get(&(address, offset & !0x3))
            .copied()
            .unwrap_or(REGISTER_ABSENT)
    }

    fn write32(&self, address: PciAddress, offset: u16, value: u32) {
        let mut space = self.space();
        if let Some(slot) = space.get_mut(&(address, offset & !0x3)) {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_host_window_wraps() {
        let mock = MockHeci::new(4);
        mock.set_auto_consume(false);
        mock.set_host_pointers(3, 3);

        for word in [0xA, 0xB, 0xC] {
            mock.write32(H_CB_WW, word);
        }
        assert_eq!(mock.host_ring_slots(), vec![0xB, 0xC, 0, 0xA]);
        assert_eq!(mock.host_ring_contents(), vec![0xA, 0xB, 0xC]);
        assert_eq!(mock.host_pointers().write_pointer, 6);
    }

    #[test]
    fn test_mock_full_ring_drops_writes() {
        let mock = MockHeci::new(2);
        mock.write32(H_CB_WW, 1);
        mock.write32(H_CB_WW, 2);
        mock.write32(H_CB_WW, 3);
        assert_eq!(mock.dropped_writes(), 1);
    }

    #[test]
    fn test_mock_answers_request() {
        let mock = MockHeci::new(8);
        mock.queue_response(Message::new(0x0000_82FF, &[0x1234]));

        let header = HeciMessageHeader::new(HECI_MKHI_MESSAGE_ADDR, 0, 4, true).unwrap();
        mock.write32(H_CB_WW, header.raw());
        mock.write32(H_CB_WW, 0x0000_02FF);
        mock.write32(H_CSR, CSR_RDY | CSR_IG);

        assert_eq!(mock.received_messages(), vec![Message::new(0x0000_02FF, &[])]);
        assert!(HeciCsr::from_raw(mock.read32(H_CSR)).interrupt_status());

        let reply = HeciMessageHeader::from_raw(mock.read32(ME_CB_RW));
        assert_eq!(reply.length(), 8);
        assert!(reply.message_complete());
        assert_eq!(mock.read32(ME_CB_RW), 0x0000_82FF);
        assert_eq!(mock.read32(ME_CB_RW), 0x1234);
        assert!(mock.me_pointers().is_empty());
    }

    #[test]
    fn test_mock_absent_reads_all_ones() {
        let mock = MockHeci::new(8);
        mock.set_present(false);
        assert_eq!(mock.read32(ME_CSR_HA), REGISTER_ABSENT);
        assert_eq!(mock.read32(H_CSR), REGISTER_ABSENT);
    }

    #[test]
    fn test_mock_reset_handshake() {
        let mock = MockHeci::new(8);
        mock.write32(H_CSR, CSR_RST | CSR_IG);
        assert!(!HeciCsr::from_raw(mock.read32(ME_CSR_HA)).ready());

        mock.write32(H_CSR, CSR_IG);
        assert!(HeciCsr::from_raw(mock.read32(ME_CSR_HA)).ready());
    }

    #[test]
    fn test_mock_pci_config() {
        let pci = MockPciConfig::new();
        let addr = PciAddress::new(0, 0x0F, 0);
        pci.add_heci_function(addr, BXT_HECI1_DEVICE_ID, 0xFED1_A000);

        assert_eq!(pci.read16(addr, PCI_VENDOR_ID_OFFSET), INTEL_VENDOR_ID);
        assert_eq!(pci.read16(addr, PCI_DEVICE_ID_OFFSET), BXT_HECI1_DEVICE_ID);
        assert_eq!(pci.read8(addr, PCI_CAPABILITY_PTR_OFFSET), 0x50);

        pci.write16(addr, PCI_COMMAND_OFFSET, PCI_COMMAND_MEMORY_SPACE);
        assert_eq!(pci.read16(addr, PCI_COMMAND_OFFSET), PCI_COMMAND_MEMORY_SPACE);
        assert_eq!(pci.read16(addr, PCI_STATUS_OFFSET), PCI_STATUS_CAPABILITY_LIST);

        let missing = PciAddress::new(0, 0x0F, 3);
        assert_eq!(pci.read16(missing, PCI_VENDOR_ID_OFFSET), 0xFFFF);
    }
}
