use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::queue::BoxError;

/// Builds the heavyweight shared resource of a pool (a browser session, a
/// connection) and the per-worker handles bound to it.
#[async_trait]
pub trait ExecutionContextFactory: Send + Sync + 'static {
    type Shared: Send + Sync + 'static;
    type Handle: Send + Sync + 'static;

    async fn create_shared(&self) -> Result<Self::Shared, BoxError>;

    async fn create_worker(&self, shared: &Self::Shared, worker_id: usize) -> Result<Self::Handle, BoxError>;

    async fn destroy_worker(&self, _handle: &Self::Handle) {}

    async fn destroy_shared(&self, _shared: &Self::Shared) {}
}

/// A checked-out worker handed to pool tasks
pub struct Worker<H> {
    id: usize,
    handle: Arc<H>,
}

impl<H> Worker<H> {
    pub(crate) fn new(id: usize, handle: Arc<H>) -> Self {
        Self { id, handle }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H> Clone for Worker<H> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<H> fmt::Debug for Worker<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("id", &self.id).finish_non_exhaustive()
    }
}
