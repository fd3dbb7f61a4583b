//! Frame synchronisation
//!
//! [`primitives`] wraps semaphores and fences, [`frame`] rotates the
//! in-flight slots and [`manager`] runs the per-frame protocol over them.

pub mod frame;
pub mod manager;
pub mod primitives;

pub use frame::FrameSyncArray;
pub use manager::{Acquire, FrameBackend, FrameContext, FrameSlot, FrameStatus, Present, SynchronisationManager, VulkanFrameBackend};
pub use primitives::{Fence, FrameSyncObject, Semaphore};
