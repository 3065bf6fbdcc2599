//! In-memory `ObjectStore` and `DocumentRepository` doubles for tests.
//!
//! Both record every call with a shared sequence number so tests can assert
//! ordering across the two collaborators, and expose switches to inject
//! failures.

use crate::{
    models::{
        document::{Document, Page},
        object::{ObjectInfo, PutOptions},
    },
    repository::document_repository::{DocumentRepository, RepositoryError, RepositoryResult},
    services::object_store::{ByteStream, ObjectStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

static SEQ: AtomicU64 = AtomicU64::new(0);

fn next_seq() -> u64 {
    SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Put(String),
    Get(String),
    Delete(String),
    Presign(String),
    Create(String),
    FindById(String),
    List(i64, i64),
}

#[derive(Default)]
struct StoreState {
    objects: HashMap<String, (Bytes, ObjectInfo)>,
    calls: Vec<(u64, Call)>,
    puts: Vec<PutOptions>,
    fail_put: bool,
    fail_delete: bool,
    hang_delete: bool,
    content_type_override: Option<String>,
}

#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryObjectStore {
    /// Report this content type from `put` regardless of what was sent.
    pub fn reporting_content_type(self, content_type: &str) -> Self {
        self.state.lock().unwrap().content_type_override = Some(content_type.to_string());
        self
    }

    pub fn fail_put(&self, on: bool) {
        self.state.lock().unwrap().fail_put = on;
    }

    pub fn fail_delete(&self, on: bool) {
        self.state.lock().unwrap().fail_delete = on;
    }

    pub fn hang_delete(&self, on: bool) {
        self.state.lock().unwrap().hang_delete = on;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn puts(&self) -> Vec<PutOptions> {
        self.state.lock().unwrap().puts.clone()
    }

    pub fn object(&self, key: &str) -> Option<ObjectInfo> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .map(|(_, info)| info.clone())
    }

    pub fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }

    /// Sequence number of the last delete issued for `key`.
    pub fn delete_seq_of(&self, key: &str) -> u64 {
        last_seq(&self.state.lock().unwrap().calls, &Call::Delete(key.to_string()))
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push((next_seq(), call));
    }
}

fn last_seq(calls: &[(u64, Call)], wanted: &Call) -> u64 {
    calls
        .iter()
        .rev()
        .find(|(_, c)| c == wanted)
        .map(|(seq, _)| *seq)
        .unwrap_or_else(|| panic!("no {wanted:?} recorded"))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        body: ByteStream<'_>,
        opts: PutOptions,
    ) -> StoreResult<ObjectInfo> {
        self.record(Call::Put(key.to_string()));
        if self.state.lock().unwrap().fail_put {
            return Err(StoreError::Io(io::Error::other("put refused")));
        }

        let chunks: Vec<Bytes> = body.try_collect().await?;
        let data = Bytes::from(chunks.concat());

        let mut state = self.state.lock().unwrap();
        state.puts.push(opts.clone());
        let info = ObjectInfo {
            key: key.to_string(),
            size: data.len() as i64,
            etag: format!("{:x}", md5::compute(&data)),
            content_type: state
                .content_type_override
                .clone()
                .unwrap_or(opts.content_type),
            metadata: opts.metadata,
        };
        state
            .objects
            .insert(key.to_string(), (data, info.clone()));
        Ok(info)
    }

    async fn get(&self, key: &str) -> StoreResult<(ByteStream<'static>, ObjectInfo)> {
        self.record(Call::Get(key.to_string()));
        let (data, info) = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok((stream::iter([Ok::<_, io::Error>(data)]).boxed(), info))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.record(Call::Delete(key.to_string()));
        let (fail, hang) = {
            let state = self.state.lock().unwrap();
            (state.fail_delete, state.hang_delete)
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        if fail {
            return Err(StoreError::Io(io::Error::other("delete refused")));
        }
        self.state.lock().unwrap().objects.remove(key);
        Ok(())
    }

    async fn presign(&self, key: &str, ttl: Duration) -> StoreResult<String> {
        self.record(Call::Presign(key.to_string()));
        Ok(format!("memory://{}?ttl={}", key, ttl.as_secs()))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct RepoState {
    rows: HashMap<String, Document>,
    calls: Vec<(u64, Call)>,
    fail_create: bool,
    fail_reads: bool,
    create_delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct MemoryDocumentRepository {
    state: Arc<Mutex<RepoState>>,
}

impl MemoryDocumentRepository {
    pub fn fail_create(&self, on: bool) {
        self.state.lock().unwrap().fail_create = on;
    }

    /// Make `find_by_id` and `list` fail with an opaque error.
    pub fn fail_reads(&self, on: bool) {
        self.state.lock().unwrap().fail_reads = on;
    }

    pub fn delay_create(&self, delay: Duration) {
        self.state.lock().unwrap().create_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn delete_seq_of(&self, id: &str) -> u64 {
        last_seq(&self.state.lock().unwrap().calls, &Call::Delete(id.to_string()))
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push((next_seq(), call));
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn create(&self, doc: &Document) -> RepositoryResult<Document> {
        self.record(Call::Create(doc.id.clone()));
        let delay = self.state.lock().unwrap().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(RepositoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        state.rows.insert(doc.id.clone(), doc.clone());
        Ok(doc.clone())
    }

    async fn find_by_id(&self, id: &str) -> RepositoryResult<Document> {
        self.record(Call::FindById(id.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(RepositoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        state.rows.get(id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn list(&self, limit: i64, offset: i64) -> RepositoryResult<Page<Document>> {
        self.record(Call::List(limit, offset));
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(RepositoryError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        let mut rows: Vec<Document> = state.rows.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        let items = rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(Page::new(items, state.rows.len() as i64))
    }

    async fn delete(&self, id: &str) -> RepositoryResult<()> {
        self.record(Call::Delete(id.to_string()));
        self.state.lock().unwrap().rows.remove(id);
        Ok(())
    }
}
