//! Shared border-router context and the task lock
//!
//! The mesh stack lives behind a recursive task lock; the local stack's
//! interface table lives behind the core lock ([`NetCore::lock`]). Code
//! that needs both goes through [`BorderRouterContext::with_mesh_and_core`],
//! which takes them in the one permitted order.

use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::mesh::MeshStack;
use crate::notify::TaskNotifier;
use crate::pbuf::BufferPool;
use crate::stack::{CoreGuard, NetCore, core_lock_held};

/// Recursive lock serializing all access to the mesh stack
pub struct TaskLock<M> {
    inner: ReentrantMutex<M>,
}

impl<M> TaskLock<M> {
    pub fn new(mesh: M) -> Self {
        Self {
            inner: ReentrantMutex::new(mesh),
        }
    }

    /// Take the task lock
    ///
    /// Panics in debug builds when the calling thread holds the core lock.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, M> {
        debug_assert!(
            !core_lock_held(),
            "task lock acquired while holding the core lock"
        );
        self.inner.lock()
    }

    pub fn into_inner(self) -> M {
        self.inner.into_inner()
    }
}

/// Process-wide state shared by the bridge components
pub struct BorderRouterContext<M: MeshStack> {
    pub task: Arc<TaskLock<M>>,
    pub core: Arc<NetCore>,
    pub pool: BufferPool,
    pub notifier: TaskNotifier,
}

impl<M: MeshStack> BorderRouterContext<M> {
    pub fn new(mesh: M, core: Arc<NetCore>, pool: BufferPool, notifier: TaskNotifier) -> Self {
        Self {
            task: Arc::new(TaskLock::new(mesh)),
            core,
            pool,
            notifier,
        }
    }

    pub fn with_mesh<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        let mesh = self.task.lock();
        f(&mesh)
    }

    pub fn with_core<R>(&self, f: impl FnOnce(&mut CoreGuard<'_>) -> R) -> R {
        let mut guard = self.core.lock();
        f(&mut guard)
    }

    /// Task lock first, then core lock
    pub fn with_mesh_and_core<R>(&self, f: impl FnOnce(&M, &mut CoreGuard<'_>) -> R) -> R {
        let mesh = self.task.lock();
        let mut guard = self.core.lock();
        f(&mesh, &mut guard)
    }
}

impl<M: MeshStack> Clone for BorderRouterContext<M> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            core: Arc::clone(&self.core),
            pool: self.pool.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
