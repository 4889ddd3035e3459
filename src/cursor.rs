//! Tracks which socket the module's data channel currently represents
use crate::responses::UartStatistics;
use core::cell::Cell;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

/// Bytes received before this fence still belong to the previously active socket
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fence {
    /// Socket owning the bytes in front of the fence
    pub slot: usize,

    /// Value of the host's received byte counter at which the fence is passed
    pub until: u32,
}

impl Fence {
    /// True if the byte with the given received counter value is located in front of the fence
    fn covers(&self, received: u32) -> bool {
        (self.until.wrapping_sub(received) as i32) > 0
    }
}

/// Snapshot of the cursor
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CursorState {
    /// Socket receiving newly arriving data channel bytes
    pub current: usize,

    /// Socket active before the last switch
    pub previous: usize,

    /// Module byte counters taken immediately before the last switch request
    pub snapshot: UartStatistics,

    /// Pending late byte fence of the last switch
    pub fence: Option<Fence>,
}

/// Active data channel cursor, readable without holding the TX or RX path
///
/// Only mutated by the switch protocol while holding both paths.
pub struct ActiveChannelCursor {
    state: Mutex<CriticalSectionRawMutex, Cell<CursorState>>,
}

impl Default for ActiveChannelCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveChannelCursor {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(CursorState {
                current: 0,
                previous: 0,
                snapshot: UartStatistics { received: 0, sent: 0 },
                fence: None,
            })),
        }
    }

    pub fn get(&self) -> CursorState {
        self.state.lock(|state| state.get())
    }

    /// Socket currently bound to the data channel
    pub fn current(&self) -> usize {
        self.get().current
    }

    /// Socket bound to the data channel before the last switch
    pub fn previous(&self) -> usize {
        self.get().previous
    }

    /// Stores the byte counters taken before requesting a switch
    pub(crate) fn record_snapshot(&self, snapshot: UartStatistics) {
        self.update(|state| state.snapshot = snapshot);
    }

    /// Moves the cursor to the target after the module acknowledged the switch
    ///
    /// All bytes up to the module's sent counter `fence` belong to the old socket.
    pub(crate) fn commit(&self, target: usize, fence: u32) {
        self.update(|state| {
            state.fence = Some(Fence {
                slot: state.current,
                until: fence,
            });
            state.previous = state.current;
            state.current = target;
        });
    }

    /// Returns the owning socket of the byte with the given received counter value
    pub(crate) fn attribute(&self, received: u32) -> usize {
        self.state.lock(|cell| {
            let mut state = cell.get();
            match state.fence {
                Some(fence) if fence.covers(received) => fence.slot,
                Some(_) => {
                    state.fence = None;
                    cell.set(state);
                    state.current
                }
                None => state.current,
            }
        })
    }

    /// True if the late bytes of the last switch have not been received completely
    pub(crate) fn is_fence_pending(&self, received: u32) -> bool {
        matches!(self.get().fence, Some(fence) if fence.covers(received))
    }

    /// Resets the cursor to socket 0, matching the module's state after reset
    pub(crate) fn reset(&self) {
        self.update(|state| *state = CursorState::default());
    }

    fn update(&self, f: impl FnOnce(&mut CursorState)) {
        self.state.lock(|cell| {
            let mut state = cell.get();
            f(&mut state);
            cell.set(state);
        });
    }
}
