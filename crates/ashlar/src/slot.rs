//! Generation-counted slot lock
//!
//! A [`VersionedSlot`] guards one entry of a fixed-capacity resource table.
//! The whole state lives in a single `AtomicU32`:
//!
//! ```text
//!  31                               2 1  0
//! +----------------------------------+----+
//! |            version               |state|
//! +----------------------------------+----+
//! ```
//!
//! Every transition is a compare-and-swap that also checks the version the
//! caller observed, so a handle that outlived a `free` can never touch the
//! reused slot. Blocking lockers park on the word's address through
//! `parking_lot_core` and re-check the version whenever they wake.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot_core::{DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

const STATE_BITS: u32 = 2;
const STATE_MASK: u32 = (1 << STATE_BITS) - 1;

/// Highest version a slot can reach; a slot at this version is retired
pub const MAX_VERSION: u32 = u32::MAX >> STATE_BITS;

/// Lifecycle state stored in the low bits of the slot word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SlotState {
    /// Not allocated
    Free = 0,
    /// Allocated, nobody holds the lock
    Unlocked = 1,
    /// Allocated and locked, no waiters
    Locked = 2,
    /// Allocated and locked, at least one thread may be parked
    Contested = 3,
}

impl SlotState {
    fn from_bits(bits: u32) -> Self {
        match bits & STATE_MASK {
            0 => Self::Free,
            1 => Self::Unlocked,
            2 => Self::Locked,
            _ => Self::Contested,
        }
    }
}

#[inline]
const fn pack(version: u32, state: SlotState) -> u32 {
    (version << STATE_BITS) | state as u32
}

#[inline]
const fn version_of(word: u32) -> u32 {
    word >> STATE_BITS
}

/// Lock-free allocation state plus a blocking lock for one resource slot
#[derive(Debug)]
pub struct VersionedSlot {
    word: AtomicU32,
}

impl Default for VersionedSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedSlot {
    /// A free slot at version 0
    pub const fn new() -> Self {
        Self::with_version(0)
    }

    /// A free slot starting at `version` (clamped to [`MAX_VERSION`])
    pub const fn with_version(version: u32) -> Self {
        let version = if version > MAX_VERSION { MAX_VERSION } else { version };
        Self { word: AtomicU32::new(pack(version, SlotState::Free)) }
    }

    /// Current version
    pub fn version(&self) -> u32 {
        version_of(self.word.load(Ordering::Acquire))
    }

    /// Current state
    pub fn state(&self) -> SlotState {
        SlotState::from_bits(self.word.load(Ordering::Acquire))
    }

    /// Whether the version counter is exhausted and the slot can never be reused
    pub fn is_end_of_life(&self) -> bool {
        self.version() == MAX_VERSION
    }

    fn key(&self) -> usize {
        &self.word as *const AtomicU32 as usize
    }

    fn transition(&self, version: u32, from: SlotState, to: SlotState) -> bool {
        self.word
            .compare_exchange(pack(version, from), pack(version, to), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// `Free -> Unlocked`, keeping the version
    pub fn try_allocate(&self, version: u32) -> bool {
        if version >= MAX_VERSION {
            log::debug!("Refusing to allocate retired slot");
            return false;
        }
        self.transition(version, SlotState::Free, SlotState::Unlocked)
    }

    /// `Unlocked -> Locked` without blocking
    pub fn try_lock(&self, version: u32) -> bool {
        self.transition(version, SlotState::Unlocked, SlotState::Locked)
    }

    /// Acquire the lock, parking while another thread holds it
    ///
    /// Returns `false` if the version does not match or the slot is freed
    /// while waiting; the handle is dead in that case.
    pub fn lock(&self, version: u32) -> bool {
        if self.try_lock(version) {
            return true;
        }

        loop {
            let word = self.word.load(Ordering::Acquire);
            if version_of(word) != version {
                return false;
            }

            match SlotState::from_bits(word) {
                SlotState::Free => return false,
                SlotState::Unlocked => {
                    // Someone may still be parked behind us, so take it as contested.
                    if self.transition(version, SlotState::Unlocked, SlotState::Contested) {
                        return true;
                    }
                }
                SlotState::Locked => {
                    if self.transition(version, SlotState::Locked, SlotState::Contested) {
                        self.park(pack(version, SlotState::Contested));
                    }
                }
                SlotState::Contested => self.park(word),
            }
        }
    }

    fn park(&self, expected: u32) {
        // SAFETY: the key is the address of `self.word`, which outlives the
        // call; the validate callback only reads that atomic.
        unsafe {
            parking_lot_core::park(
                self.key(),
                || self.word.load(Ordering::Acquire) == expected,
                || {},
                |_, _| {},
                DEFAULT_PARK_TOKEN,
                None,
            );
        }
    }

    /// `Locked | Contested -> Unlocked`, waking one waiter if contested
    pub fn unlock(&self, version: u32) -> bool {
        if self.transition(version, SlotState::Locked, SlotState::Unlocked) {
            return true;
        }
        if self.transition(version, SlotState::Contested, SlotState::Unlocked) {
            // SAFETY: see `park`.
            unsafe {
                parking_lot_core::unpark_one(self.key(), |_| DEFAULT_UNPARK_TOKEN);
            }
            return true;
        }
        false
    }

    /// `Unlocked -> Free`, bumping the version and waking every waiter
    ///
    /// Reaching [`MAX_VERSION`] retires the slot permanently.
    pub fn free(&self, version: u32) -> bool {
        if version >= MAX_VERSION {
            log::debug!("Refusing to free retired slot");
            return false;
        }
        let freed = self
            .word
            .compare_exchange(
                pack(version, SlotState::Unlocked),
                pack(version + 1, SlotState::Free),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok();
        if freed {
            if version + 1 == MAX_VERSION {
                log::warn!("Slot version counter exhausted, slot retired");
            }
            // SAFETY: see `park`.
            unsafe {
                parking_lot_core::unpark_all(self.key(), DEFAULT_UNPARK_TOKEN);
            }
        }
        freed
    }
}
