//! In-memory fakes behind the repository, storage, embedding and mail traits.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use secrecy::SecretString;
use time::{Duration as TimeDuration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::{
        otp::{OneTimePasscode, OtpCheck, OtpPurpose, OtpRepo},
        repo::{User, UserRepo},
    },
    config::{
        AppConfig, EmbeddingConfig, IngestConfig, JwtConfig, OtpConfig, SearchConfig,
        StorageConfig,
    },
    documents::{
        embedding::{EmbedError, Embedder},
        repo::{
            ChunkEmbedding, Document, DocumentRepo, DocumentStats, DocumentStatus, NewChunk,
            NewDocument,
        },
    },
    mail::{Mailer, OutgoingMail},
    state::AppState,
    storage::StorageClient,
    vendors::repo::{Vendor, VendorFields, VendorRepo},
};

pub const TEST_DIMENSIONS: usize = 256;

pub struct Fakes {
    pub state: AppState,
    pub users: Arc<MemoryUserRepo>,
    pub otps: Arc<MemoryOtpRepo>,
    pub vendors: Arc<MemoryVendorRepo>,
    pub documents: Arc<MemoryDocumentRepo>,
    pub storage: Arc<MemoryStorage>,
    pub embedder: Arc<FakeEmbedder>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".into(),
        jwt: JwtConfig {
            secret: "test".into(),
            issuer: "docvault".into(),
            audience: "docvault-users".into(),
            ttl_minutes: 15,
            refresh_ttl_minutes: 60,
        },
        otp: OtpConfig {
            ttl_minutes: 10,
            max_attempts: 5,
        },
        smtp: None,
        embedding: EmbeddingConfig {
            api_key: SecretString::new(String::new()),
            api_base: "http://localhost:0/v1".into(),
            model: "fake".into(),
            dimensions: TEST_DIMENSIONS,
            batch_size: 16,
            max_retries: 1,
            timeout_secs: 1,
        },
        ingest: IngestConfig {
            max_file_size: 64 * 1024,
            max_files_per_upload: 10,
            chunk_size: 2000,
            chunk_overlap: 200,
        },
        search: SearchConfig {
            top_k: 5,
            threshold: 0.3,
            max_results: 10,
        },
        storage: StorageConfig::Local {
            root: std::env::temp_dir().join("docvault-test-uploads"),
        },
    }
}

pub fn fakes() -> Fakes {
    let users = Arc::new(MemoryUserRepo::default());
    let otps = Arc::new(MemoryOtpRepo::default());
    let vendors = Arc::new(MemoryVendorRepo::default());
    let documents = Arc::new(MemoryDocumentRepo::default());
    let storage = Arc::new(MemoryStorage::default());
    let embedder = Arc::new(FakeEmbedder::default());
    let mailer = Arc::new(RecordingMailer::default());

    let state = AppState {
        config: Arc::new(test_config()),
        users: users.clone(),
        otps: otps.clone(),
        vendors: vendors.clone(),
        documents: documents.clone(),
        storage: storage.clone(),
        embedder: embedder.clone(),
        mailer: mailer.clone(),
    };
    Fakes {
        state,
        users,
        otps,
        vendors,
        documents,
        storage,
        embedder,
        mailer,
    }
}

/// Polls until background indexing has moved the document out of
/// `processing`.
pub async fn wait_until_settled(f: &Fakes, owner: Uuid, id: Uuid) -> Document {
    for _ in 0..500 {
        if let Some(doc) = f.documents.get(owner, id).await.unwrap() {
            if doc.status != DocumentStatus::Processing.as_str() {
                return doc;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("document {id} never left processing");
}

// users

#[derive(Default)]
pub struct MemoryUserRepo {
    rows: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub async fn count_email(&self, email: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.email == email)
            .count()
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn upsert_unverified(
        &self,
        email: &str,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.values_mut().find(|u| u.email == email) {
            if existing.verified {
                return Ok(None);
            }
            return Ok(Some(existing.clone()));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            verified: false,
            created_at: OffsetDateTime::now_utc(),
            verified_at: None,
        };
        rows.insert(user.id, user.clone());
        Ok(Some(user))
    }

    async fn mark_verified(
        &self,
        email: &str,
        password_hash: Option<&str>,
    ) -> anyhow::Result<Option<User>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows.values_mut().find(|u| u.email == email).map(|u| {
            if let Some(hash) = password_hash {
                u.password_hash = hash.to_string();
            }
            u.verified = true;
            u.verified_at.get_or_insert_with(OffsetDateTime::now_utc);
            u.clone()
        }))
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        if let Some(u) = self.rows.lock().unwrap().get_mut(&id) {
            u.password_hash = password_hash.to_string();
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.rows.lock().unwrap().remove(&id).is_some())
    }
}

// one-time passcodes

#[derive(Default)]
pub struct MemoryOtpRepo {
    rows: Mutex<Vec<OneTimePasscode>>,
}

impl MemoryOtpRepo {
    /// Moves every stored expiry into the past by `by`.
    pub async fn age_all(&self, by: TimeDuration) {
        for otp in self.rows.lock().unwrap().iter_mut() {
            otp.expires_at -= by;
        }
    }
}

#[async_trait]
impl OtpRepo for MemoryOtpRepo {
    async fn issue(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code_hash: &str,
        pending_password_hash: Option<&str>,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let now = OffsetDateTime::now_utc();
        let mut rows = self.rows.lock().unwrap();
        for otp in rows
            .iter_mut()
            .filter(|o| o.email == email && o.purpose == purpose.as_str())
        {
            otp.consumed_at.get_or_insert(now);
        }
        rows.push(OneTimePasscode {
            id: Uuid::new_v4(),
            email: email.to_string(),
            purpose: purpose.as_str().to_string(),
            code_hash: code_hash.to_string(),
            pending_password_hash: pending_password_hash.map(str::to_string),
            attempts: 0,
            expires_at,
            consumed_at: None,
            created_at: now,
        });
        Ok(())
    }

    async fn latest(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> anyhow::Result<Option<OneTimePasscode>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .rev()
            .find(|o| o.email == email && o.purpose == purpose.as_str())
            .cloned())
    }

    async fn consume(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code_hash: &str,
        now: OffsetDateTime,
        max_attempts: i32,
    ) -> anyhow::Result<OtpCheck> {
        let mut rows = self.rows.lock().unwrap();
        let Some(otp) = rows.iter_mut().rev().find(|o| {
            o.email == email && o.purpose == purpose.as_str() && o.consumed_at.is_none()
        }) else {
            return Ok(OtpCheck::Missing);
        };
        let check = otp.evaluate(code_hash, now, max_attempts);
        match check {
            OtpCheck::Accepted { .. } => otp.consumed_at = Some(now),
            OtpCheck::Mismatch => otp.attempts += 1,
            _ => {}
        }
        Ok(check)
    }
}

// vendors

#[derive(Default)]
pub struct MemoryVendorRepo {
    rows: Mutex<Vec<Vendor>>,
}

fn new_vendor(owner: Uuid, f: &VendorFields) -> Vendor {
    let now = OffsetDateTime::now_utc();
    Vendor {
        id: Uuid::new_v4(),
        owner_id: owner,
        name: f.name.clone(),
        contact_name: f.contact_name.clone(),
        email: f.email.clone(),
        phone: f.phone.clone(),
        category: f.category.clone(),
        address: f.address.clone(),
        notes: f.notes.clone(),
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl VendorRepo for MemoryVendorRepo {
    async fn list(
        &self,
        owner: Uuid,
        q: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Vendor>> {
        let needle = q.map(str::to_lowercase);
        let rows = self.rows.lock().unwrap();
        let matches = |v: &Vendor| match &needle {
            None => true,
            Some(n) => [
                Some(&v.name),
                v.contact_name.as_ref(),
                v.email.as_ref(),
                v.category.as_ref(),
            ]
            .into_iter()
            .flatten()
            .any(|s| s.to_lowercase().contains(n)),
        };
        Ok(rows
            .iter()
            .rev()
            .filter(|v| v.owner_id == owner && matches(v))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_all(&self, owner: Uuid) -> anyhow::Result<Vec<Vendor>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().filter(|v| v.owner_id == owner).cloned().collect())
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Vendor>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .find(|v| v.owner_id == owner && v.id == id)
            .cloned())
    }

    async fn create(&self, owner: Uuid, fields: &VendorFields) -> anyhow::Result<Vendor> {
        let v = new_vendor(owner, fields);
        self.rows.lock().unwrap().push(v.clone());
        Ok(v)
    }

    async fn create_many(&self, owner: Uuid, rows: &[VendorFields]) -> anyhow::Result<Vec<Vendor>> {
        let created: Vec<Vendor> = rows.iter().map(|f| new_vendor(owner, f)).collect();
        self.rows.lock().unwrap().extend(created.iter().cloned());
        Ok(created)
    }

    async fn update(
        &self,
        owner: Uuid,
        id: Uuid,
        fields: &VendorFields,
    ) -> anyhow::Result<Option<Vendor>> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows
            .iter_mut()
            .find(|v| v.owner_id == owner && v.id == id)
            .map(|v| {
                v.name = fields.name.clone();
                v.contact_name = fields.contact_name.clone();
                v.email = fields.email.clone();
                v.phone = fields.phone.clone();
                v.category = fields.category.clone();
                v.address = fields.address.clone();
                v.notes = fields.notes.clone();
                v.updated_at = OffsetDateTime::now_utc();
                v.clone()
            }))
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> anyhow::Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|v| !(v.owner_id == owner && v.id == id));
        Ok(rows.len() < before)
    }
}

// documents

#[derive(Default)]
struct DocumentTables {
    docs: Vec<Document>,
    chunks: Vec<(Uuid, ChunkEmbedding)>,
}

#[derive(Default)]
pub struct MemoryDocumentRepo {
    tables: Mutex<DocumentTables>,
    fail_insert: AtomicBool,
}

impl MemoryDocumentRepo {
    pub fn fail_next_insert(&self) {
        self.fail_insert.store(true, Ordering::SeqCst);
    }
}

/// Postgres `TEXT` columns refuse NUL; the fake does too.
fn reject_nul(text: &str) -> anyhow::Result<()> {
    if text.contains('\0') {
        anyhow::bail!("invalid byte sequence for encoding \"UTF8\": 0x00");
    }
    Ok(())
}

#[async_trait]
impl DocumentRepo for MemoryDocumentRepo {
    async fn insert(&self, doc: NewDocument) -> anyhow::Result<Document> {
        if self.fail_insert.swap(false, Ordering::SeqCst) {
            anyhow::bail!("duplicate key value violates unique constraint \"documents_storage_key_key\"");
        }
        reject_nul(&doc.filename)?;
        reject_nul(&doc.extracted_text)?;
        let row = Document {
            id: doc.id,
            owner_id: doc.owner_id,
            filename: doc.filename,
            content_type: doc.content_type,
            size_bytes: doc.size_bytes,
            storage_key: doc.storage_key,
            extracted_text: doc.extracted_text,
            status: DocumentStatus::Processing.as_str().to_string(),
            error: None,
            created_at: OffsetDateTime::now_utc(),
            indexed_at: None,
        };
        self.tables.lock().unwrap().docs.push(row.clone());
        Ok(row)
    }

    async fn list(&self, owner: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<Document>> {
        let t = self.tables.lock().unwrap();
        Ok(t.docs
            .iter()
            .rev()
            .filter(|d| d.owner_id == owner)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_all(&self, owner: Uuid) -> anyhow::Result<Vec<Document>> {
        let t = self.tables.lock().unwrap();
        Ok(t.docs.iter().filter(|d| d.owner_id == owner).cloned().collect())
    }

    async fn get(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Document>> {
        let t = self.tables.lock().unwrap();
        Ok(t.docs
            .iter()
            .find(|d| d.owner_id == owner && d.id == id)
            .cloned())
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> anyhow::Result<Option<Document>> {
        let mut t = self.tables.lock().unwrap();
        let Some(pos) = t.docs.iter().position(|d| d.owner_id == owner && d.id == id) else {
            return Ok(None);
        };
        let doc = t.docs.remove(pos);
        t.chunks.retain(|(_, c)| c.document_id != id);
        Ok(Some(doc))
    }

    async fn replace_chunks(
        &self,
        owner: Uuid,
        id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> anyhow::Result<bool> {
        for chunk in &chunks {
            reject_nul(&chunk.content)?;
        }
        let mut t = self.tables.lock().unwrap();
        let Some(doc) = t
            .docs
            .iter_mut()
            .find(|d| d.owner_id == owner && d.id == id)
        else {
            return Ok(false);
        };
        doc.status = DocumentStatus::Indexed.as_str().to_string();
        doc.error = None;
        doc.indexed_at = Some(OffsetDateTime::now_utc());

        t.chunks.retain(|(_, c)| c.document_id != id);
        t.chunks.extend(chunks.into_iter().map(|c| {
            (
                owner,
                ChunkEmbedding {
                    document_id: id,
                    chunk_index: c.index,
                    content: c.content,
                    embedding: c.embedding,
                },
            )
        }));
        Ok(true)
    }

    async fn set_status(
        &self,
        owner: Uuid,
        id: Uuid,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut t = self.tables.lock().unwrap();
        if let Some(doc) = t
            .docs
            .iter_mut()
            .find(|d| d.owner_id == owner && d.id == id)
        {
            doc.status = status.as_str().to_string();
            doc.error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn chunk_embeddings(&self, owner: Uuid) -> anyhow::Result<Vec<ChunkEmbedding>> {
        let t = self.tables.lock().unwrap();
        Ok(t.chunks
            .iter()
            .filter(|(o, _)| *o == owner)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn stats(&self, owner: Uuid) -> anyhow::Result<DocumentStats> {
        let t = self.tables.lock().unwrap();
        let mut stats = DocumentStats::default();
        for d in t.docs.iter().filter(|d| d.owner_id == owner) {
            stats.documents += 1;
            stats.total_bytes += d.size_bytes;
            match d.status.as_str() {
                "indexed" => stats.indexed += 1,
                "failed" => stats.failed += 1,
                _ => stats.processing += 1,
            }
        }
        stats.chunks = t.chunks.iter().filter(|(o, _)| *o == owner).count() as i64;
        Ok(stats)
    }

    async fn storage_keys(&self, owner: Uuid) -> anyhow::Result<Vec<String>> {
        let t = self.tables.lock().unwrap();
        Ok(t.docs
            .iter()
            .filter(|d| d.owner_id == owner)
            .map(|d| d.storage_key.clone())
            .collect())
    }
}

// storage

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Bytes>>,
    fail_put: AtomicBool,
}

impl MemoryStorage {
    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    pub fn fail_next_put(&self) {
        self.fail_put.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        if self.fail_put.swap(false, Ordering::SeqCst) {
            anyhow::bail!("storage unavailable");
        }
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> anyhow::Result<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such key {key}"))
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// embeddings

/// Bag-of-words embedder: each lowercase alphanumeric token adds one to a
/// hashed bucket, so texts sharing words score higher.
#[derive(Default)]
pub struct FakeEmbedder {
    failure: Mutex<Option<EmbedError>>,
}

impl FakeEmbedder {
    /// Every call fails with `err` until [`FakeEmbedder::recover`].
    pub fn fail_with(&self, err: EmbedError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; TEST_DIMENSIONS];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            v[(fnv1a(&token.to_lowercase()) % TEST_DIMENSIONS as u64) as usize] += 1.0;
        }
        v
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(inputs.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        TEST_DIMENSIONS
    }
}

// mail

lazy_static! {
    static ref CODE_RE: Regex = Regex::new(r"\b\d{6}\b").unwrap();
}

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn fail_next(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Codes mailed to `to`, oldest first.
    pub fn codes_for(&self, to: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.to == to)
            .filter_map(|m| CODE_RE.find(&m.body).map(|c| c.as_str().to_string()))
            .collect()
    }

    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.codes_for(to).pop()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: OutgoingMail) -> anyhow::Result<()> {
        if self.fail.swap(false, Ordering::SeqCst) {
            anyhow::bail!("smtp connection refused");
        }
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}
