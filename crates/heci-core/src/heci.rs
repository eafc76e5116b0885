//! HECI transport - frames messages into the host ring and reassembles
//! responses from the ME ring.
//!
//! Every call re-reads the ring pointers from the CSRs; nothing is cached
//! across calls because the ME owns the authoritative cursors. No operation
//! retries internally: every failure is returned to the caller.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace};

use crate::config::HeciConfig;
use crate::device::{HeciDeviceHandle, HeciDeviceId};
use crate::events::{FrameDirection, HeciEvent, HeciObserver, TracingObserver};
use crate::message::Message;
use crate::protocol::constants::*;
use crate::protocol::{HeciCsr, HeciMessageHeader};
use crate::ring::CircularBufferPointers;
use crate::state::{Exchange, ExchangeState};
use crate::transport::{HeciError, HeciRegisters};

/// Number of payload dwords copied into frame events.
const EVENT_DATA_WORDS: usize = 4;

/// Host/ME client routing pair written into every framing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeciAddress {
    pub host: u8,
    pub me: u8,
}

impl HeciAddress {
    pub const fn new(host: u8, me: u8) -> Self {
        Self { host, me }
    }
}

/// A poll bound and the timeout it was derived from.
///
/// `at` is `None` when the timeout is too large to represent as an
/// `Instant`; such a deadline never expires.
#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Option<Instant>,
    timeout_ms: u64,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whichever of `self` and `other` expires first.
    fn earliest(self, other: Deadline) -> Self {
        match (self.at, other.at) {
            (Some(a), Some(b)) if b < a => other,
            (None, Some(_)) => other,
            _ => self,
        }
    }

    /// Time left before expiry; `None` once expired.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.at {
            Some(at) if now >= at => None,
            Some(at) => Some(at - now),
            None => Some(Duration::MAX),
        }
    }
}

/// Largest payload one frame can carry in a ring of `depth` slots.
fn frame_payload_limit(depth: u8) -> usize {
    ((depth as usize).saturating_sub(1) * 4).min(HECI_MAX_FRAME_LENGTH & !0x3)
}

/// HECI transport.
///
/// Holds timing configuration and an observer; device state lives in the
/// `HeciDeviceHandle` passed to each call.
pub struct HeciTransport<O: HeciObserver = TracingObserver> {
    config: HeciConfig,
    observer: Arc<O>,
}

impl HeciTransport<TracingObserver> {
    /// Create a transport with the default tracing observer.
    pub fn new(config: HeciConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: HeciObserver> HeciTransport<O> {
    /// Create a transport with a custom observer.
    pub fn with_observer(config: HeciConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &HeciConfig {
        &self.config
    }

    /// Routing pair for MKHI traffic.
    pub fn mkhi_address(&self) -> HeciAddress {
        HeciAddress::new(self.config.host_address, self.config.mkhi_address)
    }

    /// Wrap `registers` in a handle configured for this transport.
    pub fn open_device<R: HeciRegisters>(
        &self,
        registers: R,
        base_address: u64,
    ) -> HeciDeviceHandle<R> {
        HeciDeviceHandle::new(self.config.device, base_address, registers)
            .with_max_message_len(self.config.max_message_len)
    }

    fn transition<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
        exchange: &mut Exchange,
        next: ExchangeState,
    ) {
        let from = exchange.goto_state(next);
        self.observer.on_event(&HeciEvent::StateChanged {
            device: device.id(),
            from,
            to: next,
        });
    }

    fn emit_frame(
        &self,
        device: HeciDeviceId,
        direction: FrameDirection,
        header: HeciMessageHeader,
        payload: &[u32],
    ) {
        self.observer.on_event(&HeciEvent::Frame {
            device,
            direction,
            header,
            data: payload.iter().take(EVENT_DATA_WORDS).copied().collect(),
        });
    }

    /// Poll `probe` until it yields a value or `deadline` passes.
    ///
    /// Each sleep is capped by the remaining time, so the call returns no
    /// later than the deadline plus one poll interval.
    fn poll_until<T>(
        &self,
        deadline: Deadline,
        mut probe: impl FnMut() -> Result<Option<T>, HeciError>,
    ) -> Result<T, HeciError> {
        loop {
            if let Some(value) = probe()? {
                return Ok(value);
            }
            let Some(remaining) = deadline.remaining(Instant::now()) else {
                return Err(HeciError::Timeout {
                    timeout_ms: deadline.timeout_ms,
                });
            };
            thread::sleep(self.config.poll_interval().min(remaining));
        }
    }

    /// ME CSR, failing if the controller is absent or not ready.
    fn check_present<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
    ) -> Result<HeciCsr, HeciError> {
        let me = HeciCsr::from_raw(device.read32(ME_CSR_HA));
        if me.is_absent() || !me.ready() {
            debug!(device = %device.id(), csr = ?me, "ME not ready");
            return Err(HeciError::DeviceNotPresent);
        }
        Ok(me)
    }

    fn host_csr<R: HeciRegisters>(&self, device: &HeciDeviceHandle<R>) -> Result<HeciCsr, HeciError> {
        let host = HeciCsr::from_raw(device.read32(H_CSR));
        if host.is_absent() {
            return Err(HeciError::DeviceNotPresent);
        }
        Ok(host)
    }

    fn ensure_host_ready<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
    ) -> Result<(), HeciError> {
        let host = self.host_csr(device)?;
        if !host.ready() {
            debug!(device = %device.id(), "Setting host ready");
            device.write32(H_CSR, host.with_bits(CSR_RDY | CSR_IG, CSR_RST));
        }
        Ok(())
    }

    fn host_pointers<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
    ) -> Result<CircularBufferPointers, HeciError> {
        Ok(CircularBufferPointers::from_csr(self.host_csr(device)?))
    }

    /// ME ring pointers, failing on absence or overflow.
    fn me_pointers<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
    ) -> Result<CircularBufferPointers, HeciError> {
        let me = HeciCsr::from_raw(device.read32(ME_CSR_HA));
        if me.is_absent() {
            return Err(HeciError::DeviceNotPresent);
        }
        let ptrs = CircularBufferPointers::from_csr(me);
        ptrs.check_overflow()?;
        Ok(ptrs)
    }

    /// Clear a pending host interrupt and tell the ME a frame was consumed.
    fn acknowledge<R: HeciRegisters>(&self, device: &HeciDeviceHandle<R>) {
        let host = HeciCsr::from_raw(device.read32(H_CSR));
        device.write32(H_CSR, host.with_doorbell(true));
    }

    /// Pop every slot currently in the ME ring and acknowledge.
    ///
    /// Used after a malformed frame header; the ring contents can no longer
    /// be framed, so a `reset` is the reliable way to resynchronize.
    fn discard_available<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
    ) -> Result<(), HeciError> {
        let ptrs = self.me_pointers(device)?;
        for _ in 0..ptrs.filled_slots() {
            device.read32(ME_CB_RW);
        }
        self.acknowledge(device);
        Ok(())
    }

    /// Send `message` without waiting for a response.
    #[instrument(level = "debug", skip(self, device, message), fields(device = %device.id(), len = message.len()))]
    pub fn send<R: HeciRegisters>(
        &self,
        device: &mut HeciDeviceHandle<R>,
        message: &Message,
        address: HeciAddress,
    ) -> Result<(), HeciError> {
        let mut exchange = Exchange::new();
        self.send_exchange(device, message, address, None, &mut exchange)?;
        self.transition(device, &mut exchange, ExchangeState::Complete);
        Ok(())
    }

    /// Send `request` and block until one response message is read.
    ///
    /// `timeout` bounds the whole call, including waits between fragments
    /// of a multi-frame request. The response is not checked against the
    /// request; callers validate correlation. If the response is larger than
    /// `response_capacity` bytes the ring is still drained and
    /// `BufferTooSmall` is returned.
    #[instrument(
        level = "debug",
        skip(self, device, request),
        fields(device = %device.id(), len = request.len(), timeout_ms = %timeout.as_millis())
    )]
    pub fn send_and_wait_for_ack<R: HeciRegisters>(
        &self,
        device: &mut HeciDeviceHandle<R>,
        request: &Message,
        address: HeciAddress,
        timeout: Duration,
        response_capacity: usize,
    ) -> Result<Message, HeciError> {
        let deadline = Deadline::after(timeout);
        let mut exchange = Exchange::new();
        self.send_exchange(device, request, address, Some(deadline), &mut exchange)?;
        self.transition(device, &mut exchange, ExchangeState::AwaitingResponse);
        self.finish_read(device, &mut exchange, response_capacity, Some(deadline))
    }

    /// Read one message that was not solicited by a preceding send.
    ///
    /// Non-blocking calls return `NoData` if the ME ring is empty; blocking
    /// calls wait up to the configured receive timeout.
    #[instrument(level = "debug", skip(self, device), fields(device = %device.id()))]
    pub fn receive<R: HeciRegisters>(
        &self,
        device: &mut HeciDeviceHandle<R>,
        blocking: bool,
    ) -> Result<Message, HeciError> {
        let deadline = blocking.then(|| Deadline::after(self.config.receive_timeout()));
        let mut exchange = Exchange::new();
        self.transition(device, &mut exchange, ExchangeState::AwaitingResponse);
        let capacity = device.max_message_len();
        self.finish_read(device, &mut exchange, capacity, deadline)
    }

    /// Discard every frame currently in the ME ring.
    ///
    /// Does not wait for new frames, but a frame whose body is still being
    /// written is read to its end (bounded by the receive timeout) so the
    /// ring is left on a frame boundary. Returns the number of frames
    /// dropped.
    #[instrument(level = "debug", skip(self, device), fields(device = %device.id()))]
    pub fn drain<R: HeciRegisters>(
        &self,
        device: &mut HeciDeviceHandle<R>,
    ) -> Result<usize, HeciError> {
        let mut frames = 0;
        // Bounded in case the peer keeps producing.
        for _ in 0..=u8::MAX {
            let ptrs = self.me_pointers(device)?;
            if ptrs.is_empty() {
                break;
            }
            let header = HeciMessageHeader::from_raw(device.read32(ME_CB_RW));
            let frame_words = header.length_in_dwords();
            if frame_words >= ptrs.depth as usize {
                self.discard_available(device)?;
            } else {
                let deadline = Deadline::after(self.config.receive_timeout());
                self.poll_until(deadline, || {
                    let ptrs = self.me_pointers(device)?;
                    Ok((ptrs.filled_slots() as usize >= frame_words).then_some(()))
                })?;
                for _ in 0..frame_words {
                    device.read32(ME_CB_RW);
                }
                self.acknowledge(device);
            }
            frames += 1;
        }
        if frames > 0 {
            self.observer.on_event(&HeciEvent::Drained {
                device: device.id(),
                frames,
            });
        }
        Ok(frames)
    }

    /// Wait for the ME to become ready, then mark the host side ready.
    #[instrument(level = "debug", skip(self, device), fields(device = %device.id()))]
    pub fn initialize<R: HeciRegisters>(
        &self,
        device: &mut HeciDeviceHandle<R>,
    ) -> Result<(), HeciError> {
        let deadline = Deadline::after(self.config.reset_timeout());
        self.poll_until(deadline, || {
            let me = HeciCsr::from_raw(device.read32(ME_CSR_HA));
            Ok((!me.is_absent() && me.ready()).then_some(()))
        })
        .map_err(|_| HeciError::DeviceNotPresent)?;

        let host = self.host_csr(device)?;
        device.write32(H_CSR, host.with_bits(CSR_RDY | CSR_IG, CSR_RST));
        debug!(device = %device.id(), "HECI initialized");
        Ok(())
    }

    /// Host-initiated reset handshake.
    ///
    /// Clears both rings; anything in flight is lost.
    #[instrument(level = "debug", skip(self, device), fields(device = %device.id()))]
    pub fn reset<R: HeciRegisters>(&self, device: &mut HeciDeviceHandle<R>) -> Result<(), HeciError> {
        if HeciCsr::from_raw(device.read32(ME_CSR_HA)).is_absent() {
            return Err(HeciError::DeviceNotPresent);
        }

        let host = self.host_csr(device)?;
        device.write32(H_CSR, host.with_bits(CSR_RST | CSR_IG, 0));
        self.poll_until(Deadline::after(self.config.reset_timeout()), || {
            Ok((!HeciCsr::from_raw(device.read32(ME_CSR_HA)).ready()).then_some(()))
        })?;

        let host = self.host_csr(device)?;
        device.write32(H_CSR, host.with_bits(CSR_IG, CSR_RST));
        self.poll_until(Deadline::after(self.config.reset_timeout()), || {
            Ok(HeciCsr::from_raw(device.read32(ME_CSR_HA)).ready().then_some(()))
        })?;

        let host = self.host_csr(device)?;
        device.write32(H_CSR, host.with_bits(CSR_RDY | CSR_IG, 0));
        self.observer.on_event(&HeciEvent::Reset {
            device: device.id(),
        });
        Ok(())
    }

    fn send_exchange<R: HeciRegisters>(
        &self,
        device: &mut HeciDeviceHandle<R>,
        message: &Message,
        address: HeciAddress,
        caller_deadline: Option<Deadline>,
        exchange: &mut Exchange,
    ) -> Result<(), HeciError> {
        self.transition(device, exchange, ExchangeState::Sending);
        let result = self.write_message(device, message, address, caller_deadline);
        if let Err(err) = &result {
            self.transition(device, exchange, ExchangeState::for_error(err));
        }
        result
    }

    fn finish_read<R: HeciRegisters>(
        &self,
        device: &mut HeciDeviceHandle<R>,
        exchange: &mut Exchange,
        capacity: usize,
        deadline: Option<Deadline>,
    ) -> Result<Message, HeciError> {
        match self.read_message(device, capacity, deadline) {
            Ok(message) => {
                self.transition(device, exchange, ExchangeState::Complete);
                Ok(message)
            }
            Err(err) => {
                self.transition(device, exchange, ExchangeState::for_error(&err));
                Err(err)
            }
        }
    }

    fn write_message<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
        message: &Message,
        address: HeciAddress,
        caller_deadline: Option<Deadline>,
    ) -> Result<(), HeciError> {
        let total = message.len();
        if total == 0 || total > device.max_message_len() {
            return Err(HeciError::InvalidLength {
                length: total,
                max: device.max_message_len(),
            });
        }

        self.check_present(device)?;
        self.ensure_host_ready(device)?;

        let limit = frame_payload_limit(self.host_pointers(device)?.depth);
        if limit == 0 {
            debug!(device = %device.id(), "Host ring has no usable depth");
            return Err(HeciError::DeviceNotPresent);
        }

        let words = message.words();
        let send_deadline = Deadline::after(self.config.send_timeout());
        let deadline = match caller_deadline {
            Some(caller) => send_deadline.earliest(caller),
            None => send_deadline,
        };
        let mut offset = 0;
        while offset < total {
            let chunk = (total - offset).min(limit);
            let complete = offset + chunk == total;

            let ptrs = if offset == 0 {
                self.host_pointers(device)?
            } else {
                // Later fragments go out once the ME has consumed the
                // previous one.
                self.poll_until(deadline, || {
                    let ptrs = self.host_pointers(device)?;
                    ptrs.check_overflow()?;
                    Ok(ptrs.is_empty().then_some(ptrs))
                })?
            };

            let payload = &words[offset / 4..(offset + chunk).div_ceil(4)];
            ptrs.check_room(payload.len() + 1)?;

            let header = HeciMessageHeader::new(address.me, address.host, chunk, complete)
                .map_err(|_| HeciError::InvalidLength {
                    length: chunk,
                    max: HECI_MAX_FRAME_LENGTH,
                })?;

            device.write32(H_CB_WW, header.raw());
            for &word in payload {
                device.write32(H_CB_WW, word);
            }
            trace!(header = ?header, write_pointer = ptrs.write_pointer, "Frame written");
            self.emit_frame(device.id(), FrameDirection::Tx, header, payload);

            let host = self.host_csr(device)?;
            device.write32(H_CSR, host.with_doorbell(false));

            offset += chunk;
        }
        Ok(())
    }

    fn read_message<R: HeciRegisters>(
        &self,
        device: &HeciDeviceHandle<R>,
        capacity: usize,
        first_deadline: Option<Deadline>,
    ) -> Result<Message, HeciError> {
        let mut bytes = Vec::new();
        let mut total = 0;
        let mut truncated = false;
        let mut first = true;

        loop {
            let header_deadline = if first {
                first_deadline
            } else {
                Some(Deadline::after(self.config.receive_timeout()))
            };

            let ptrs = match header_deadline {
                Some(deadline) => self.poll_until(deadline, || {
                    let ptrs = self.me_pointers(device)?;
                    Ok((!ptrs.is_empty()).then_some(ptrs))
                })?,
                None => {
                    let ptrs = self.me_pointers(device)?;
                    if ptrs.is_empty() {
                        return Err(HeciError::NoData);
                    }
                    ptrs
                }
            };

            let header = HeciMessageHeader::from_raw(device.read32(ME_CB_RW));
            let frame_words = header.length_in_dwords();
            if frame_words >= ptrs.depth as usize {
                debug!(header = ?header, depth = ptrs.depth, "Frame larger than ME ring");
                self.discard_available(device)?;
                return Err(HeciError::Overflow {
                    filled: ptrs.filled_slots(),
                    depth: ptrs.depth,
                    requested: frame_words,
                });
            }

            if frame_words > 0 {
                let body_deadline = header_deadline
                    .unwrap_or_else(|| Deadline::after(self.config.receive_timeout()));
                self.poll_until(body_deadline, || {
                    let ptrs = self.me_pointers(device)?;
                    Ok((ptrs.filled_slots() as usize >= frame_words).then_some(()))
                })?;
            }

            let payload: Vec<u32> = (0..frame_words).map(|_| device.read32(ME_CB_RW)).collect();
            self.emit_frame(device.id(), FrameDirection::Rx, header, &payload);
            self.acknowledge(device);

            let length = header.length();
            if !truncated && total + length <= capacity {
                let start = bytes.len();
                bytes.extend(payload.iter().flat_map(|w| w.to_le_bytes()));
                bytes.truncate(start + length);
            } else {
                truncated = true;
            }
            total += length;

            if header.message_complete() {
                break;
            }
            first = false;
        }

        if truncated {
            debug!(needed = total, capacity, "Response larger than receive buffer");
            return Err(HeciError::BufferTooSmall {
                needed: total,
                capacity,
            });
        }
        Ok(Message::from_bytes(&bytes))
    }
}
