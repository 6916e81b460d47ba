//! Object handles
//!
//! Open, transfer, close, delete and stat, over either layout. In the shared
//! layout `open` and `close` are collectives: every participant must call
//! them for the same object in the same order.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

use crate::collective::Collective;
use crate::config::{Layout, WeaveConfig};
use crate::error::{Result, WeaveError};
use crate::metrics::TransferMetrics;
use crate::mpu::{
    CompletionBuilder, OrAbort, PartTransferEngine, Session, SessionCoordinator, TagAggregator,
    UploadContext, COORDINATOR_RANK,
};
use crate::storage::{ObjectMeta, ObjectStore};

/// Direction of an open handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Write,
    Read,
}

/// How to open an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    pub access: Access,
    /// Create the object (empty) if it does not exist
    pub create: bool,
    /// Reset the object to zero length first
    pub truncate: bool,
}

impl OpenOptions {
    /// Write access, creating the object if needed
    pub fn write() -> Self {
        Self {
            access: Access::Write,
            create: true,
            truncate: false,
        }
    }

    pub fn read() -> Self {
        Self {
            access: Access::Read,
            create: false,
            truncate: false,
        }
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }
}

/// One participant's client
pub struct Weave {
    store: Arc<dyn ObjectStore>,
    collective: Arc<dyn Collective>,
    config: WeaveConfig,
    metrics: TransferMetrics,
}

impl Weave {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        collective: Arc<dyn Collective>,
        config: WeaveConfig,
    ) -> Self {
        Self {
            store,
            collective,
            config,
            metrics: TransferMetrics::new(),
        }
    }

    pub fn rank(&self) -> u32 {
        self.collective.rank()
    }

    pub fn participants(&self) -> u32 {
        self.collective.size()
    }

    pub fn layout(&self) -> Layout {
        self.config.layout
    }

    pub fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    fn sessions(&self) -> SessionCoordinator<'_> {
        SessionCoordinator::new(
            self.store.as_ref(),
            self.collective.as_ref(),
            self.config.max_upload_id_len,
        )
        .with_first_part_number(self.config.first_part_number)
    }

    fn engine(&self) -> PartTransferEngine<'_> {
        PartTransferEngine::new(self.store.as_ref(), &self.metrics)
    }

    /// Open `key`. Collective for shared-layout writes.
    pub async fn open(&self, key: &str, options: OpenOptions) -> Result<ObjectHandle<'_>> {
        let collective = self.collective.as_ref();
        let mut upload = None;

        if options.access == Access::Write {
            let sessions = self.sessions();
            match self.config.layout {
                Layout::FilePerProcess => {
                    let reset = sessions
                        .reset_required(key, options.truncate, options.create)
                        .await
                        .or_abort(collective)?;
                    if reset {
                        sessions.reset(key).await.or_abort(collective)?;
                    }
                }
                Layout::Shared => {
                    let reset = if self.rank() == COORDINATOR_RANK {
                        sessions
                            .reset_required(key, options.truncate, options.create)
                            .await
                            .or_abort(collective)?
                    } else {
                        false
                    };
                    let session = sessions.begin_session(key, reset).await?;
                    self.metrics.sessions_begun.inc();
                    self.metrics.open_sessions.inc();
                    upload = Some(UploadContext::new(session, self.rank()));
                }
            }
        }

        debug!("Rank {} opened {} ({:?})", self.rank(), key, options.access);
        Ok(ObjectHandle {
            weave: self,
            key: key.into(),
            access: options.access,
            upload,
        })
    }

    /// HEAD the object; `None` if it does not exist
    pub async fn stat(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.store.head(key).await.or_abort(self.collective.as_ref())
    }

    /// DELETE the object
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store
            .delete(key)
            .await
            .or_abort(self.collective.as_ref())
    }
}

/// An open object
pub struct ObjectHandle<'w> {
    weave: &'w Weave,
    key: String,
    access: Access,
    upload: Option<UploadContext>,
}

impl<'w> ObjectHandle<'w> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Multipart session, for shared-layout writes
    pub fn session(&self) -> Option<&Session> {
        self.upload.as_ref().map(UploadContext::session)
    }

    /// Parts this participant wrote through the handle
    pub fn parts_written(&self) -> u64 {
        self.upload.as_ref().map_or(0, UploadContext::parts_written)
    }

    /// Write one transfer; returns the number of bytes written.
    ///
    /// Shared layout: the next part of the upload. Per-process layout: the
    /// object's whole content is replaced.
    pub async fn write(&mut self, data: Bytes) -> Result<u64> {
        if self.access != Access::Write {
            return Err(WeaveError::InvalidAccess {
                key: self.key.clone(),
                reason: "handle is open for reading".into(),
            });
        }
        let len = data.len() as u64;
        let collective = self.weave.collective.as_ref();
        let engine = self.weave.engine();

        match self.upload.as_mut() {
            Some(upload) => {
                upload.write_next(&engine, data).await.or_abort(collective)?;
            }
            None if self.weave.config.layout == Layout::Shared => {
                return Err(WeaveError::NoSession { key: self.key.clone() }).or_abort(collective);
            }
            None => {
                engine.replace(&self.key, data).await.or_abort(collective)?;
            }
        }
        Ok(len)
    }

    /// Ranged read
    pub async fn read(&self, offset: u64, len: u64) -> Result<Bytes> {
        self.weave
            .engine()
            .read_range(&self.key, offset, len)
            .await
            .or_abort(self.weave.collective.as_ref())
    }

    /// Close the handle. Collective for shared-layout writes: tags are
    /// gathered, the coordinator finalizes, and everyone waits for it.
    pub async fn close(self) -> Result<()> {
        let Some(upload) = self.upload else {
            return Ok(());
        };
        let weave = self.weave;
        let collective = weave.collective.as_ref();

        let gathered = TagAggregator::new(collective)
            .gather_tags(upload.ledger())
            .await?;
        CompletionBuilder::new(weave.store.as_ref(), collective)
            .finalize(upload.session(), gathered.as_ref())
            .await?;

        weave.metrics.sessions_finalized.inc();
        weave.metrics.open_sessions.dec();
        if weave.rank() == COORDINATOR_RANK {
            info!(
                "Closed {} after {} parts per rank",
                self.key,
                upload.parts_written()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collective::local::LocalGroup;
    use crate::storage::MemoryStore;

    fn single(store: &Arc<MemoryStore>, layout: Layout) -> Weave {
        let group = LocalGroup::new(1);
        let config = WeaveConfig {
            layout,
            ..WeaveConfig::default()
        };
        Weave::new(store.clone(), Arc::new(group.endpoint(0)), config)
    }

    #[tokio::test]
    async fn test_shared_write_close_single_rank() {
        let store = Arc::new(MemoryStore::new("test"));
        let weave = single(&store, Layout::Shared);

        let mut handle = weave.open("obj", OpenOptions::write()).await.unwrap();
        assert!(handle.session().is_some());
        handle.write(Bytes::from_static(b"hello ")).await.unwrap();
        handle.write(Bytes::from_static(b"world")).await.unwrap();
        assert_eq!(handle.parts_written(), 2);
        handle.close().await.unwrap();

        assert_eq!(store.object("obj").unwrap(), Bytes::from_static(b"hello world"));
        assert_eq!(store.open_uploads(), 0);
        assert_eq!(weave.metrics().sessions_finalized.get(), 1);
        assert_eq!(weave.metrics().open_sessions.get(), 0);
        assert_eq!(weave.stat("obj").await.unwrap().unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_write_on_read_handle_is_local_error() {
        let store = Arc::new(MemoryStore::new("test"));
        let weave = single(&store, Layout::FilePerProcess);
        store.put("obj", Bytes::from_static(b"abc")).await.unwrap();

        let mut handle = weave.open("obj", OpenOptions::read()).await.unwrap();
        let err = handle.write(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, WeaveError::InvalidAccess { .. }));
        assert_eq!(handle.read(1, 2).await.unwrap(), Bytes::from_static(b"bc"));
    }

    #[tokio::test]
    async fn test_truncate_resets_existing_object() {
        let store = Arc::new(MemoryStore::new("test"));
        let weave = single(&store, Layout::FilePerProcess);
        store.put("obj", Bytes::from_static(b"old")).await.unwrap();

        let handle = weave
            .open("obj", OpenOptions::write().truncate(true))
            .await
            .unwrap();
        assert_eq!(store.object("obj").unwrap().len(), 0);
        handle.close().await.unwrap();

        weave.delete("obj").await.unwrap();
        assert!(weave.stat("obj").await.unwrap().is_none());
    }
}
