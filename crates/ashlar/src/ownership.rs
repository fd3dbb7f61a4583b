//! Parent-scoped ownership of Vulkan handles
//!
//! Every device child (pipelines, layouts, shader modules, semaphores, ...)
//! is held in an [`Owned`] wrapper that knows how to destroy it and which
//! object created it. The wrapper stores a *weak* reference to its parent:
//! when the parent is still alive the child is destroyed through it, when the
//! parent has already vanished the destroy call is skipped, because the
//! parent's own teardown released everything it created.
//!
//! ```text
//! DeviceShared (Arc) ──owns──▶ VkDevice
//!        ▲ Weak
//!        └── Owned<vk::Pipeline, Weak<DeviceShared>>
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use ash::vk;

/// A handle type with a distinguished null value
pub trait NullableHandle: Copy {
    /// The null handle
    fn null_handle() -> Self;
    /// Whether this is the null handle
    fn is_null_handle(&self) -> bool;
}

impl<T: vk::Handle + Copy> NullableHandle for T {
    fn null_handle() -> Self {
        T::from_raw(0)
    }

    fn is_null_handle(&self) -> bool {
        self.as_raw() == 0
    }
}

/// Reference from a child object to the object that created it
pub trait Parent {
    /// The object the destroy function receives
    type Live: ?Sized;

    /// Run `f` with the live parent, or return `None` if it is gone
    fn with_live<R>(&self, f: impl FnOnce(&Self::Live) -> R) -> Option<R>;
}

/// Marker for handles without a parent object; always considered alive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoParent;

impl Parent for NoParent {
    type Live = NoParent;

    fn with_live<R>(&self, f: impl FnOnce(&NoParent) -> R) -> Option<R> {
        Some(f(self))
    }
}

impl<T: ?Sized> Parent for Weak<T> {
    type Live = T;

    fn with_live<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.upgrade().map(|parent| f(&parent))
    }
}

impl<T: ?Sized> Parent for Option<Arc<T>> {
    type Live = T;

    fn with_live<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.as_deref().map(f)
    }
}

/// Destroy function: receives the live parent, the handle and the allocator
pub type DestroyFn<H, P> = fn(&<P as Parent>::Live, H, Option<&vk::AllocationCallbacks>);

/// RAII owner of a single handle
///
/// At most one destroy call ever happens: on drop, if the handle is non-null
/// and the parent is still alive. Moving the wrapper moves ownership; there
/// is no `Clone`.
pub struct Owned<H: NullableHandle, P: Parent = NoParent> {
    handle: H,
    parent: P,
    destroy: DestroyFn<H, P>,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
}

impl<H: NullableHandle, P: Parent> Owned<H, P> {
    /// Take ownership of `handle`
    pub fn new(handle: H, parent: P, destroy: DestroyFn<H, P>) -> Self {
        Self { handle, parent, destroy, allocation_callbacks: None }
    }

    /// An empty owner, to be filled through [`Owned::slot`]
    pub fn null(parent: P, destroy: DestroyFn<H, P>) -> Self {
        Self::new(H::null_handle(), parent, destroy)
    }

    /// Use custom host allocation callbacks for the destroy call
    ///
    /// The callbacks must be the ones the handle was created with.
    #[must_use]
    pub fn with_allocation_callbacks(mut self, callbacks: vk::AllocationCallbacks) -> Self {
        self.allocation_callbacks = Some(callbacks);
        self
    }

    /// The owned handle, without transferring ownership
    pub fn get(&self) -> H {
        self.handle
    }

    /// Mutable storage for APIs that return the handle through an out parameter
    ///
    /// Intended for a single fill-in right after [`Owned::null`].
    pub fn slot(&mut self) -> &mut H {
        debug_assert!(self.handle.is_null_handle(), "overwriting a live handle leaks it");
        &mut self.handle
    }

    /// Whether no handle is owned
    pub fn is_null(&self) -> bool {
        self.handle.is_null_handle()
    }

    /// The parent reference
    pub fn parent(&self) -> &P {
        &self.parent
    }

    /// Whether dropping now would reach the parent
    pub fn parent_alive(&self) -> bool {
        self.parent.with_live(|_| ()).is_some()
    }

    /// Give up ownership without destroying; the wrapper becomes null
    pub fn take(&mut self) -> H {
        std::mem::replace(&mut self.handle, H::null_handle())
    }
}

impl<H: NullableHandle, P: Parent> Drop for Owned<H, P> {
    fn drop(&mut self) {
        if self.handle.is_null_handle() {
            return;
        }
        let handle = self.take();
        let destroy = self.destroy;
        let callbacks = self.allocation_callbacks.as_ref();
        if self.parent.with_live(|parent| destroy(parent, handle, callbacks)).is_none() {
            log::trace!("Parent already destroyed, skipping child destruction");
        }
    }
}

impl<H: NullableHandle + fmt::Debug, P: Parent> fmt::Debug for Owned<H, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned")
            .field("handle", &self.handle)
            .field("parent_alive", &self.parent_alive())
            .finish()
    }
}
