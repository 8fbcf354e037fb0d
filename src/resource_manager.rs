//! Resource management

use crate::error::SdsError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] bounds the work admitted by request handlers.
/// Each kind of resource is guarded by an optional Tokio Semaphore; a missing limit means the
/// resource is not managed.
#[derive(Debug)]
pub struct ResourceManager {
    /// Optional semaphore for concurrent remote object downloads.
    remote_connections: Option<Semaphore>,

    /// Optional semaphore for render output buffers (bytes).
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,

    /// Optional semaphore for render tasks.
    tasks: Option<Semaphore>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    pub fn new(
        remote_connection_limit: Option<usize>,
        memory_limit: Option<usize>,
        task_limit: Option<usize>,
    ) -> Self {
        Self {
            remote_connections: remote_connection_limit.map(Semaphore::new),
            memory: memory_limit.map(Semaphore::new),
            total_memory: memory_limit,
            tasks: task_limit.map(Semaphore::new),
        }
    }

    /// Acquire a remote storage connection.
    pub async fn remote_connection(&self) -> Result<Option<SemaphorePermit>, SdsError> {
        optional_acquire(&self.remote_connections, 1).await
    }

    /// Acquire memory for an output buffer of `bytes` bytes.
    ///
    /// Requests larger than the whole pool fail immediately instead of waiting forever.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, SdsError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(SdsError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        optional_acquire(&self.memory, bytes).await
    }

    /// Acquire a render task slot.
    pub async fn task(&self) -> Result<Option<SemaphorePermit>, SdsError> {
        optional_acquire(&self.tasks, 1).await
    }
}

async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, SdsError> {
    match sem {
        Some(sem) => Ok(Some(sem.acquire_many(n.try_into()?).await?)),
        None => Ok(None),
    }
}
