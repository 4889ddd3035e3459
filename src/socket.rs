//! # Logical socket table
//!
//! Fixed number of socket slots, each owning a bounded queue of received application bytes.
//! The table is shared between the receive path, which appends to the queues, and the socket
//! operations, which drain them. All accesses are short critical sections.
use crate::error::Error;
use core::cell::RefCell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Deque;

/// Host side state of a logical socket
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SocketStatus {
    /// Slot is free and may be allocated
    #[default]
    Closed,
    /// Slot was allocated, but is not connected yet
    Created,
    /// Connection is established
    Connected,
    /// Module reported the connection as lost, socket needs to be closed
    Broken,
}

/// Transport protocol of a socket
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Tls,
}

impl Protocol {
    /// Socket type code used by the module
    pub(crate) fn code(&self) -> u8 {
        match self {
            Protocol::Tcp => 0,
            Protocol::Udp => 1,
            Protocol::Tls => 2,
        }
    }
}

/// IP version of a socket
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IpVersion {
    #[default]
    V4,
    V6,
}

/// Received byte was dropped, as the socket queue is full
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct QueueOverflow;

/// Single socket slot
pub(crate) struct LogicalSocket<const QUEUE_SIZE: usize> {
    pub(crate) status: SocketStatus,
    pub(crate) protocol: Protocol,
    pub(crate) ip_version: IpVersion,

    /// Received application data
    pub(crate) queue: Deque<u8, QUEUE_SIZE>,

    /// Number of bytes dropped due to a full queue
    pub(crate) overflow_count: u32,

    /// Certificate profile used for the TLS handshake
    pub(crate) certificate_id: Option<u8>,
}

impl<const QUEUE_SIZE: usize> LogicalSocket<QUEUE_SIZE> {
    const fn new() -> Self {
        Self {
            status: SocketStatus::Closed,
            protocol: Protocol::Tcp,
            ip_version: IpVersion::V4,
            queue: Deque::new(),
            overflow_count: 0,
            certificate_id: None,
        }
    }

    /// Flushes the queue and resets all counters
    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Fixed-size table of logical sockets
pub struct SocketTable<const SOCKETS: usize, const QUEUE_SIZE: usize> {
    slots: Mutex<CriticalSectionRawMutex, RefCell<[LogicalSocket<QUEUE_SIZE>; SOCKETS]>>,

    /// Number of usable slots, 1 in single UART setups
    limit: usize,
}

impl<const SOCKETS: usize, const QUEUE_SIZE: usize> SocketTable<SOCKETS, QUEUE_SIZE> {
    /// Creates a table with the first `limit` slots usable
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Mutex::new(RefCell::new(core::array::from_fn(|_| LogicalSocket::new()))),
            limit: limit.min(SOCKETS),
        }
    }

    /// Number of usable slots
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns an error if the slot index is out of range
    pub fn check(&self, slot: usize) -> Result<(), Error> {
        if slot >= self.limit {
            return Err(Error::BadParameter);
        }

        Ok(())
    }

    /// Allocates the first closed slot
    pub fn allocate(&self, protocol: Protocol, ip_version: IpVersion) -> Result<usize, Error> {
        let limit = self.limit;
        self.with_slots(|slots| {
            let slot = slots[..limit]
                .iter()
                .position(|socket| socket.status == SocketStatus::Closed)
                .ok_or(Error::NoFreeSocketSlot)?;

            slots[slot].reset();
            slots[slot].status = SocketStatus::Created;
            slots[slot].protocol = protocol;
            slots[slot].ip_version = ip_version;
            Ok(slot)
        })
    }

    /// Appends a received byte to the slot's queue. A full queue drops the byte and counts it.
    pub(crate) fn route_byte(&self, slot: usize, byte: u8) -> Result<(), QueueOverflow> {
        self.with_slots(|slots| {
            let socket = &mut slots[slot];
            if socket.queue.push_back(byte).is_err() {
                socket.overflow_count = socket.overflow_count.wrapping_add(1);
                return Err(QueueOverflow);
            }

            Ok(())
        })
    }

    /// Moves queued bytes into the buffer and returns the count
    pub(crate) fn pop(&self, slot: usize, buffer: &mut Buffer<'_>) -> usize {
        self.with_slots(|slots| {
            let queue = &mut slots[slot].queue;
            let mut count = 0;

            while !buffer.is_full() {
                match queue.pop_front() {
                    Some(byte) => buffer.push(byte),
                    None => break,
                }
                count += 1;
            }

            count
        })
    }

    /// Flushes the queue, resets counters and marks the slot as closed
    pub fn close(&self, slot: usize) {
        self.with_slots(|slots| slots[slot].reset());
    }

    /// Closes all slots
    pub fn reset_all(&self) {
        self.with_slots(|slots| slots.iter_mut().for_each(|socket| socket.reset()));
    }

    pub fn status(&self, slot: usize) -> SocketStatus {
        self.with_slots(|slots| slots[slot].status)
    }

    pub(crate) fn set_status(&self, slot: usize, status: SocketStatus) {
        self.with_slots(|slots| slots[slot].status = status);
    }

    pub fn protocol(&self, slot: usize) -> Protocol {
        self.with_slots(|slots| slots[slot].protocol)
    }

    pub fn ip_version(&self, slot: usize) -> IpVersion {
        self.with_slots(|slots| slots[slot].ip_version)
    }

    pub(crate) fn set_protocol(&self, slot: usize, protocol: Protocol) {
        self.with_slots(|slots| slots[slot].protocol = protocol);
    }

    pub(crate) fn certificate_id(&self, slot: usize) -> Option<u8> {
        self.with_slots(|slots| slots[slot].certificate_id)
    }

    pub(crate) fn set_certificate_id(&self, slot: usize, id: Option<u8>) {
        self.with_slots(|slots| slots[slot].certificate_id = id);
    }

    /// Number of bytes dropped since the slot was allocated
    pub fn overflow_count(&self, slot: usize) -> u32 {
        self.with_slots(|slots| slots[slot].overflow_count)
    }

    /// Number of bytes waiting to be received
    pub fn queued(&self, slot: usize) -> usize {
        self.with_slots(|slots| slots[slot].queue.len())
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut [LogicalSocket<QUEUE_SIZE>; SOCKETS]) -> R) -> R {
        self.slots.lock(|slots| f(&mut slots.borrow_mut()))
    }
}

/// Helper for filling receive buffer
pub(crate) struct Buffer<'a> {
    buffer: &'a mut [u8],

    /// Next buffer index to start inserting data
    position: usize,
}

impl<'a> Buffer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, position: 0 }
    }

    /// Returns true if the buffer is completely filled
    pub fn is_full(&self) -> bool {
        self.position >= self.buffer.len()
    }

    /// Returns the current fill length
    pub fn len(&self) -> usize {
        self.position
    }

    /// Appends a single byte. Caller checks [Buffer::is_full] first.
    fn push(&mut self, byte: u8) {
        self.buffer[self.position] = byte;
        self.position += 1;
    }
}
