//! Delivery pipeline
//!
//! Upload and serve paths for manuscript files:
//! - Ingest: classify → encrypt → put blob → append file record
//! - Serve: decide → get blob → decrypt → verify → count → watermark
//! - Delete: remove file record → delete blob
//!
//! The pipeline holds no state of its own. Encryption, decryption and
//! watermarking run on the blocking pool and never under a record lock.
//! Counters record "access granted and decrypted"; a watermarking failure
//! after that point still counts.

use crate::clock::Clock;
use crate::retry::RetryPolicy;
use crate::settings::WatermarkSettingsService;
use bytes::Bytes;
use scriptorium_common::db::RecordStore;
use scriptorium_common::errors::{AppError, Result};
use scriptorium_common::metrics;
use scriptorium_common::models::{CounterKind, FileType, Manuscript, StoredFile};
use scriptorium_common::storage::{storage_key, ContentStore};
use scriptorium_common::{decide, CryptoStore, EffectiveLevel, Principal};
use scriptorium_watermark::{Attribution, DocumentFormat, Watermarker};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Which serve path a delivery took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryKind {
    View,
    Download,
}

impl DeliveryKind {
    pub fn required_level(self) -> EffectiveLevel {
        match self {
            DeliveryKind::View => EffectiveLevel::Content,
            DeliveryKind::Download => EffectiveLevel::Download,
        }
    }

    fn counter(self) -> CounterKind {
        match self {
            DeliveryKind::View => CounterKind::View,
            DeliveryKind::Download => CounterKind::Download,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryKind::View => "view",
            DeliveryKind::Download => "download",
        }
    }
}

/// Raw upload as received from the caller
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Bytes,
    /// Declared content type; decides the file type
    pub mime_type: String,
    pub original_name: String,
}

impl Upload {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>, original_name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            original_name: original_name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestedFile {
    pub slot: usize,
    pub file: StoredFile,
}

/// Plaintext (possibly marked) handed back to the caller
#[derive(Debug, Clone)]
pub struct ServedFile {
    pub bytes: Bytes,
    pub mime_type: String,
    pub file_name: String,
    pub file_type: FileType,
    /// Set when the copy carries a watermark
    pub watermark_id: Option<String>,
    /// Checksum of the stored plaintext, before marking
    pub checksum: String,
}

#[derive(Clone)]
pub struct DeliveryPipeline {
    store: Arc<dyn RecordStore>,
    content: Arc<dyn ContentStore>,
    crypto: Arc<CryptoStore>,
    settings: WatermarkSettingsService,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    max_upload_bytes: usize,
}

impl DeliveryPipeline {
    pub fn new(
        store: Arc<dyn RecordStore>,
        content: Arc<dyn ContentStore>,
        crypto: Arc<CryptoStore>,
        settings: WatermarkSettingsService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            content,
            crypto,
            settings,
            clock,
            retry: RetryPolicy::default(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Encrypt and store a new file at the end of the manuscript's slots
    #[instrument(
        skip(self, principal, upload),
        fields(%manuscript_id, principal_id = %principal.id, size = upload.bytes.len())
    )]
    pub async fn ingest_file(
        &self,
        principal: &Principal,
        manuscript_id: Uuid,
        upload: Upload,
    ) -> Result<IngestedFile> {
        let size = upload.bytes.len();
        if size > self.max_upload_bytes {
            return Err(AppError::PayloadTooLarge {
                size,
                limit: self.max_upload_bytes,
            });
        }

        let manuscript = self.live_manuscript(None, manuscript_id).await?;
        require_owner_or_admin(principal, &manuscript)?;

        let file_type = FileType::classify(&upload.mime_type);
        if !Watermarker::accepts_upload(DocumentFormat::from(file_type), &upload.mime_type) {
            return Err(AppError::validation(
                "mime_type",
                format!("{} cannot be watermarked", upload.mime_type),
            ));
        }
        let file_id = Uuid::new_v4();
        let key = storage_key(manuscript_id, file_id);

        let crypto = self.crypto.clone();
        let plaintext = upload.bytes.clone();
        let encrypted = tokio::task::spawn_blocking(move || crypto.encrypt(&plaintext))
            .await
            .map_err(join_error)??;

        let ciphertext = Bytes::from(encrypted.ciphertext);
        self.retry
            .run("content.put", || self.content.put(&key, ciphertext.clone()))
            .await?;

        let file = StoredFile {
            id: file_id,
            file_type,
            storage_key: key.clone(),
            checksum: encrypted.checksum,
            size: size as u64,
            mime_type: upload.mime_type,
            original_name: display_name(&upload.original_name, file_id),
            encryption_key_id: encrypted.key_id,
            uploaded_by: principal.id,
            uploaded_at: self.clock.now(),
        };

        let slot = match self.store.append_file(manuscript_id, file.clone()).await {
            Ok(slot) => slot,
            Err(e) => {
                if let Err(cleanup) = self.content.delete(&key).await {
                    warn!(error = %cleanup, %key, "Orphaned blob after failed append");
                }
                return Err(e);
            }
        };

        metrics::record_ingest(file_type.as_str(), file.size);
        info!(%file_id, slot, file_type = file_type.as_str(), "File ingested");

        Ok(IngestedFile { slot, file })
    }

    /// Serve a file for reading; needs CONTENT
    pub async fn view_file(
        &self,
        principal: Option<&Principal>,
        manuscript_id: Uuid,
        slot: usize,
    ) -> Result<ServedFile> {
        self.deliver(principal, manuscript_id, slot, DeliveryKind::View)
            .await
    }

    /// Serve a file for download; needs DOWNLOAD
    pub async fn download_file(
        &self,
        principal: Option<&Principal>,
        manuscript_id: Uuid,
        slot: usize,
    ) -> Result<ServedFile> {
        self.deliver(principal, manuscript_id, slot, DeliveryKind::Download)
            .await
    }

    /// Remove the file at `slot`. Later slots shift down by one.
    #[instrument(skip(self, principal), fields(principal_id = %principal.id))]
    pub async fn delete_file(
        &self,
        principal: &Principal,
        manuscript_id: Uuid,
        slot: usize,
    ) -> Result<StoredFile> {
        let manuscript = self.live_manuscript(None, manuscript_id).await?;
        require_owner_or_admin(principal, &manuscript)?;

        let removed = self.store.remove_file_at(manuscript_id, slot).await?;

        if let Err(e) = self
            .retry
            .run("content.delete", || self.content.delete(&removed.storage_key))
            .await
        {
            warn!(error = %e, key = %removed.storage_key, "Blob left behind after file removal");
        }

        info!(file_id = %removed.id, "File deleted");
        Ok(removed)
    }

    /// Level the caller holds on the manuscript right now
    pub async fn effective_access_level(
        &self,
        principal: Option<&Principal>,
        manuscript_id: Uuid,
    ) -> Result<EffectiveLevel> {
        let manuscript = self.live_manuscript(principal, manuscript_id).await?;
        self.level_for(principal, &manuscript).await
    }

    /// Delete blobs under the manuscript that no file record points to.
    ///
    /// Run while nothing is uploading to the manuscript: a blob whose record
    /// is not yet appended looks like an orphan.
    #[instrument(skip(self, admin), fields(principal_id = %admin.id))]
    pub async fn sweep_orphans(&self, admin: &Principal, manuscript_id: Uuid) -> Result<Vec<String>> {
        admin.require_admin()?;

        let prefix = format!("manuscripts/{}/", manuscript_id);
        let keys = self
            .retry
            .run("content.list", || self.content.list(&prefix))
            .await?;

        let referenced: HashSet<String> = self
            .store
            .get_manuscript(manuscript_id)
            .await?
            .map(|m| m.files.into_iter().map(|f| f.storage_key).collect())
            .unwrap_or_default();

        let mut removed = Vec::new();
        for key in keys.into_iter().filter(|k| !referenced.contains(k)) {
            self.retry
                .run("content.delete", || self.content.delete(&key))
                .await?;
            debug!(%key, "Removed orphaned blob");
            removed.push(key);
        }

        metrics::record_orphans_swept(removed.len());
        info!(count = removed.len(), "Orphan sweep finished");
        Ok(removed)
    }

    #[instrument(
        skip(self, principal),
        fields(principal_id = ?principal.map(|p| p.id), kind = kind.as_str())
    )]
    async fn deliver(
        &self,
        principal: Option<&Principal>,
        manuscript_id: Uuid,
        slot: usize,
        kind: DeliveryKind,
    ) -> Result<ServedFile> {
        let result = self.serve(principal, manuscript_id, slot, kind).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_delivery(kind.as_str(), outcome);
        result
    }

    async fn serve(
        &self,
        principal: Option<&Principal>,
        manuscript_id: Uuid,
        slot: usize,
        kind: DeliveryKind,
    ) -> Result<ServedFile> {
        let manuscript = self.live_manuscript(principal, manuscript_id).await?;

        let level = self.level_for(principal, &manuscript).await?;
        let required = kind.required_level();
        if !level.permits(required) {
            return Err(AppError::InsufficientAccess {
                manuscript_id: manuscript_id.to_string(),
                required: required.as_str().to_string(),
            });
        }
        // Anonymous callers never reach CONTENT
        let principal = principal.ok_or_else(|| AppError::forbidden("sign in to read files"))?;

        let file = manuscript
            .file_at(slot)
            .cloned()
            .ok_or_else(|| AppError::FileNotFound {
                manuscript_id: manuscript_id.to_string(),
                slot,
            })?;

        let ciphertext = match self
            .retry
            .run("content.get", || self.content.get(&file.storage_key))
            .await
        {
            Ok(bytes) => bytes,
            Err(AppError::BlobNotFound { .. }) => {
                return Err(AppError::CorruptData {
                    resource: file.id.to_string(),
                    message: "stored content is missing".to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let plaintext = self.open(&file, ciphertext).await?;

        self.store
            .increment_counter(manuscript_id, kind.counter())
            .await?;

        let settings = self.settings.current().await?;
        let format = DocumentFormat::from(file.file_type);

        if !(settings.enabled && Watermarker::supports(format)) {
            debug!(file_id = %file.id, format = format.as_str(), "Serving unmarked copy");
            return Ok(served(&file, Bytes::from(plaintext), None));
        }

        let attribution = Attribution::for_principal(principal, self.clock.now());
        let watermark_id = attribution.watermark_id.clone();
        let marker = Watermarker::new(settings);

        let started = Instant::now();
        let marked = tokio::task::spawn_blocking(move || marker.apply(&plaintext, format, &attribution))
            .await
            .map_err(join_error)?
            .map_err(AppError::from)?;
        metrics::record_watermark(format.as_str(), started.elapsed().as_secs_f64());

        // The id-to-viewer mapping for tracing leaked copies
        info!(
            file_id = %file.id,
            %watermark_id,
            viewer_id = %principal.id,
            "Delivered watermarked copy"
        );

        Ok(served(&file, Bytes::from(marked), Some(watermark_id)))
    }

    /// Load a manuscript, hiding soft-deleted ones from everyone but admins
    async fn live_manuscript(
        &self,
        principal: Option<&Principal>,
        manuscript_id: Uuid,
    ) -> Result<Manuscript> {
        let is_admin = principal.is_some_and(Principal::is_admin);
        self.store
            .get_manuscript(manuscript_id)
            .await?
            .filter(|m| is_admin || !m.is_deleted())
            .ok_or_else(|| AppError::ManuscriptNotFound {
                id: manuscript_id.to_string(),
            })
    }

    async fn level_for(
        &self,
        principal: Option<&Principal>,
        manuscript: &Manuscript,
    ) -> Result<EffectiveLevel> {
        let grants = match principal {
            Some(p) => self.store.approved_for(p.id, manuscript.id).await?,
            None => Vec::new(),
        };
        Ok(decide(principal, manuscript, &grants, self.clock.now()))
    }

    /// Decrypt and verify off the async executor
    async fn open(&self, file: &StoredFile, ciphertext: Bytes) -> Result<Vec<u8>> {
        let crypto = self.crypto.clone();
        let key_id = file.encryption_key_id.clone();
        let checksum = file.checksum.clone();
        let resource = file.id.to_string();

        let result = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let plaintext = crypto.decrypt(&ciphertext, key_id.as_deref())?;
            CryptoStore::verify_checksum(&plaintext, &checksum, &resource)?;
            Ok(plaintext)
        })
        .await
        .map_err(join_error)?;

        if let Err(ref e) = result {
            metrics::record_decryption_failure();
            warn!(file_id = %file.id, error = %e, "Stored content failed to open");
        }
        result
    }
}

fn require_owner_or_admin(principal: &Principal, manuscript: &Manuscript) -> Result<()> {
    if manuscript.is_owned_by(principal.id) || principal.is_admin() {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "only the owner or an admin may change files of manuscript {}",
            manuscript.id
        )))
    }
}

/// Last path segment of the client's file name
fn display_name(original: &str, file_id: Uuid) -> String {
    let name = original.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() {
        file_id.to_string()
    } else {
        name.to_string()
    }
}

fn served(file: &StoredFile, bytes: Bytes, watermark_id: Option<String>) -> ServedFile {
    ServedFile {
        bytes,
        mime_type: file.mime_type.clone(),
        file_name: file.original_name.clone(),
        file_type: file.file_type,
        watermark_id,
        checksum: file.checksum.clone(),
    }
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError::Internal {
        message: format!("blocking task failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::requests::{AccessRequestWorkflow, NewAccessRequest, ReviewInput};
    use chrono::Duration;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use scriptorium_common::config::AccessRequestConfig;
    use scriptorium_common::db::{ManuscriptStore, MemoryStore};
    use scriptorium_common::models::{
        ContentThreshold, Lifecycle, ManuscriptStatus, RequestedLevel, Visibility,
        WatermarkSettingsUpdate,
    };
    use scriptorium_common::notify::RecordingNotifier;
    use scriptorium_common::storage::MemoryContentStore;
    use scriptorium_common::{ErrorKind, Role};

    struct Fixture {
        pipeline: DeliveryPipeline,
        workflow: AccessRequestWorkflow,
        settings: WatermarkSettingsService,
        store: Arc<MemoryStore>,
        content: Arc<MemoryContentStore>,
        clock: ManualClock,
        owner: Principal,
        manuscript_id: Uuid,
    }

    async fn fixture(configure: impl FnOnce(&mut Manuscript)) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let content = Arc::new(MemoryContentStore::new());
        let clock = ManualClock::default();
        let settings = WatermarkSettingsService::new(store.clone(), "Scriptorium");

        let owner = principal(Role::Owner, "owner@example.edu");
        let mut manuscript = Manuscript::new(owner.id, "Codex Example");
        manuscript.status = ManuscriptStatus::Published;
        configure(&mut manuscript);
        store.put_manuscript(&manuscript).await.unwrap();

        let crypto = Arc::new(CryptoStore::new(&CryptoStore::generate_key_hex()));
        let pipeline = DeliveryPipeline::new(
            store.clone(),
            content.clone(),
            crypto,
            settings.clone(),
            Arc::new(clock.clone()),
        )
        .with_retry(RetryPolicy::none())
        .with_max_upload_bytes(1024 * 1024);

        let workflow = AccessRequestWorkflow::new(
            store.clone(),
            Arc::new(RecordingNotifier::new()),
            Arc::new(clock.clone()),
            AccessRequestConfig::default(),
        );

        Fixture {
            pipeline,
            workflow,
            settings,
            store,
            content,
            clock,
            owner,
            manuscript_id: manuscript.id,
        }
    }

    fn principal(role: Role, email: &str) -> Principal {
        Principal::new(Uuid::new_v4(), role, email, "Jane Doe")
    }

    fn sample_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal("Folio 1")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
    }

    async fn counters(f: &Fixture) -> (u64, u64) {
        let m = f.store.get_manuscript(f.manuscript_id).await.unwrap().unwrap();
        (m.counters.view_count, m.counters.download_count)
    }

    #[tokio::test]
    async fn test_restricted_manuscript_end_to_end() {
        let f = fixture(|m| {
            m.visibility = Visibility::Restricted;
            m.access_level.content = ContentThreshold::Approved;
        })
        .await;
        f.pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new(sample_pdf(), "application/pdf", "folio.pdf"))
            .await
            .unwrap();

        let reader = principal(Role::User, "jane@example.edu");

        let err = f.pipeline.view_file(None, f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = f.pipeline.view_file(Some(&reader), f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let request = f
            .workflow
            .create(
                Some(&reader),
                f.manuscript_id,
                NewAccessRequest {
                    requested_level: RequestedLevel::ViewContent,
                    justification: "Transcribing the colophon and comparing scribal hands across folios."
                        .into(),
                    purpose: "palaeographic study".into(),
                    institution: "Inst".into(),
                    duration_days: Some(30),
                },
            )
            .await
            .unwrap();
        f.workflow
            .review(
                &principal(Role::Reviewer, "reviewer@example.edu"),
                request.id,
                ReviewInput::approve()
                    .with_level(RequestedLevel::ViewContent)
                    .for_days(30),
            )
            .await
            .unwrap();

        f.clock.advance(Duration::days(29));
        let served = f.pipeline.view_file(Some(&reader), f.manuscript_id, 0).await.unwrap();
        assert_eq!(served.mime_type, "application/pdf");
        assert!(served.watermark_id.is_some());
        assert!(contains(&served.bytes, "jane@example.edu"));

        // VIEW_CONTENT does not cover downloads
        let err = f.pipeline.download_file(Some(&reader), f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        f.clock.advance(Duration::days(2));
        let err = f.pipeline.view_file(Some(&reader), f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        assert_eq!(counters(&f).await, (1, 0));
    }

    #[tokio::test]
    async fn test_view_counts_only_successful_decrypts() {
        let f = fixture(|_| {}).await;
        f.pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new("plain transcription", "text/plain", "notes.txt"))
            .await
            .unwrap();
        let reader = principal(Role::User, "jane@example.edu");

        f.pipeline.view_file(Some(&reader), f.manuscript_id, 0).await.unwrap();
        f.pipeline.view_file(Some(&reader), f.manuscript_id, 0).await.unwrap();
        assert_eq!(counters(&f).await, (2, 0));

        // Missing slot and missing manuscript count nothing
        let err = f.pipeline.view_file(Some(&reader), f.manuscript_id, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = f.pipeline.view_file(Some(&reader), Uuid::new_v4(), 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Registered users hold CONTENT but not DOWNLOAD by default
        let err = f.pipeline.download_file(Some(&reader), f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(counters(&f).await, (2, 0));

        f.pipeline.download_file(Some(&f.owner), f.manuscript_id, 0).await.unwrap();
        assert_eq!(counters(&f).await, (2, 1));
    }

    #[tokio::test]
    async fn test_text_passes_through_unmarked() {
        let f = fixture(|_| {}).await;
        let ingested = f
            .pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new("incipit liber primus", "text/plain; charset=utf-8", "a/b/incipit.txt"))
            .await
            .unwrap();
        assert_eq!(ingested.file.file_type, FileType::Text);
        assert_eq!(ingested.file.original_name, "incipit.txt");
        assert_eq!(ingested.file.checksum, CryptoStore::checksum(b"incipit liber primus"));

        let served = f
            .pipeline
            .view_file(Some(&principal(Role::User, "jane@example.edu")), f.manuscript_id, 0)
            .await
            .unwrap();
        assert_eq!(&served.bytes[..], b"incipit liber primus");
        assert_eq!(served.watermark_id, None);
        assert_eq!(served.file_name, "incipit.txt");
    }

    #[tokio::test]
    async fn test_disabled_watermark_serves_original() {
        let f = fixture(|_| {}).await;
        let admin = principal(Role::Admin, "admin@example.edu");
        f.settings
            .update(&admin, WatermarkSettingsUpdate { enabled: Some(false), ..Default::default() })
            .await
            .unwrap();

        let pdf = sample_pdf();
        f.pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new(pdf.clone(), "application/pdf", "folio.pdf"))
            .await
            .unwrap();

        let served = f.pipeline.view_file(Some(&f.owner), f.manuscript_id, 0).await.unwrap();
        assert_eq!(&served.bytes[..], &pdf[..]);
        assert!(served.watermark_id.is_none());
    }

    #[tokio::test]
    async fn test_each_delivery_gets_fresh_watermark() {
        let f = fixture(|_| {}).await;
        f.pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new(sample_pdf(), "application/pdf", "folio.pdf"))
            .await
            .unwrap();
        let reader = principal(Role::User, "jane@example.edu");

        let a = f.pipeline.view_file(Some(&reader), f.manuscript_id, 0).await.unwrap();
        let b = f.pipeline.view_file(Some(&reader), f.manuscript_id, 0).await.unwrap();
        assert_ne!(a.watermark_id, b.watermark_id);
        assert_eq!(a.checksum, b.checksum);
    }

    #[tokio::test]
    async fn test_ingest_requires_owner_or_admin() {
        let f = fixture(|_| {}).await;
        let upload = || Upload::new("x", "text/plain", "x.txt");

        for role in [Role::User, Role::Reviewer, Role::Owner] {
            let stranger = principal(role, "someone@example.edu");
            let err = f
                .pipeline
                .ingest_file(&stranger, f.manuscript_id, upload())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
        }
        assert!(f.content.is_empty().await);

        let admin = principal(Role::Admin, "admin@example.edu");
        let ingested = f.pipeline.ingest_file(&admin, f.manuscript_id, upload()).await.unwrap();
        assert_eq!(ingested.slot, 0);
        assert_eq!(
            ingested.file.storage_key,
            format!("manuscripts/{}/{}.enc", f.manuscript_id, ingested.file.id)
        );
    }

    #[tokio::test]
    async fn test_upload_limit() {
        let f = fixture(|_| {}).await;
        let err = f
            .pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new(vec![0u8; 1024 * 1024 + 1], "image/png", "big.png"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(f.content.is_empty().await);
    }

    #[tokio::test]
    async fn test_unmarkable_image_types_rejected_at_ingest() {
        let f = fixture(|_| {}).await;
        for mime in ["image/svg+xml", "image/tiff"] {
            let err = f
                .pipeline
                .ingest_file(
                    &f.owner,
                    f.manuscript_id,
                    Upload::new(r#"<svg xmlns="http://www.w3.org/2000/svg"/>"#, mime, "figure"),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{mime}");
        }

        assert!(f.content.is_empty().await);
        let manuscript = f.store.get_manuscript(f.manuscript_id).await.unwrap().unwrap();
        assert!(manuscript.files.is_empty());
    }

    #[tokio::test]
    async fn test_stored_blob_is_ciphertext() {
        let f = fixture(|_| {}).await;
        let ingested = f
            .pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new("secret marginalia", "text/plain", "m.txt"))
            .await
            .unwrap();

        let blob = f.content.get(&ingested.file.storage_key).await.unwrap();
        assert!(!contains(&blob, "secret marginalia"));
    }

    #[tokio::test]
    async fn test_delete_renumbers_slots() {
        let f = fixture(|_| {}).await;
        let mut ids = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            let ingested = f
                .pipeline
                .ingest_file(&f.owner, f.manuscript_id, Upload::new(name, "text/plain", name))
                .await
                .unwrap();
            ids.push(ingested.file);
        }

        let removed = f.pipeline.delete_file(&f.owner, f.manuscript_id, 0).await.unwrap();
        assert_eq!(removed.id, ids[0].id);
        assert!(!f.content.exists(&ids[0].storage_key).await.unwrap());

        let manuscript = f.store.get_manuscript(f.manuscript_id).await.unwrap().unwrap();
        assert_eq!(manuscript.files.len(), 2);
        assert_eq!(manuscript.files[0].id, ids[1].id);

        let served = f.pipeline.view_file(Some(&f.owner), f.manuscript_id, 0).await.unwrap();
        assert_eq!(&served.bytes[..], b"b.txt");

        let err = f.pipeline.delete_file(&f.owner, f.manuscript_id, 2).await.unwrap_err();
        assert!(matches!(err, AppError::FileNotFound { slot: 2, .. }));

        let stranger = principal(Role::User, "jane@example.edu");
        let err = f.pipeline.delete_file(&stranger, f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_missing_blob_is_corrupt_data() {
        let f = fixture(|_| {}).await;
        let ingested = f
            .pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new("text", "text/plain", "t.txt"))
            .await
            .unwrap();
        f.content.delete(&ingested.file.storage_key).await.unwrap();

        let err = f.pipeline.view_file(Some(&f.owner), f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert_eq!(counters(&f).await, (0, 0));
    }

    #[tokio::test]
    async fn test_tampered_blob_is_corrupt_data() {
        let f = fixture(|_| {}).await;
        let ingested = f
            .pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new("text", "text/plain", "t.txt"))
            .await
            .unwrap();

        let mut blob = f.content.get(&ingested.file.storage_key).await.unwrap().to_vec();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        f.content.put(&ingested.file.storage_key, Bytes::from(blob)).await.unwrap();

        let err = f.pipeline.view_file(Some(&f.owner), f.manuscript_id, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptData);
        assert_eq!(counters(&f).await, (0, 0));
    }

    #[tokio::test]
    async fn test_soft_deleted_manuscript() {
        let deleted_by = Uuid::new_v4();
        let f = fixture(|m| {
            m.lifecycle = Lifecycle::Deleted {
                at: chrono::Utc::now(),
                by: deleted_by,
            }
        })
        .await;

        let err = f
            .pipeline
            .effective_access_level(Some(&f.owner), f.manuscript_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = f
            .pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new("x", "text/plain", "x.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let admin = principal(Role::Admin, "admin@example.edu");
        let level = f
            .pipeline
            .effective_access_level(Some(&admin), f.manuscript_id)
            .await
            .unwrap();
        assert_eq!(level, EffectiveLevel::Full);
    }

    #[tokio::test]
    async fn test_effective_access_level() {
        let f = fixture(|_| {}).await;
        let level = f.pipeline.effective_access_level(None, f.manuscript_id).await.unwrap();
        assert_eq!(level, EffectiveLevel::Metadata);

        let reader = principal(Role::User, "jane@example.edu");
        let level = f
            .pipeline
            .effective_access_level(Some(&reader), f.manuscript_id)
            .await
            .unwrap();
        assert_eq!(level, EffectiveLevel::Content);

        let level = f
            .pipeline
            .effective_access_level(Some(&f.owner), f.manuscript_id)
            .await
            .unwrap();
        assert_eq!(level, EffectiveLevel::Full);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_orphans() {
        let f = fixture(|_| {}).await;
        let kept = f
            .pipeline
            .ingest_file(&f.owner, f.manuscript_id, Upload::new("kept", "text/plain", "k.txt"))
            .await
            .unwrap();

        let orphan = storage_key(f.manuscript_id, Uuid::new_v4());
        f.content.put(&orphan, Bytes::from_static(b"stray")).await.unwrap();
        let elsewhere = storage_key(Uuid::new_v4(), Uuid::new_v4());
        f.content.put(&elsewhere, Bytes::from_static(b"other")).await.unwrap();

        let err = f.pipeline.sweep_orphans(&f.owner, f.manuscript_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let admin = principal(Role::Admin, "admin@example.edu");
        let removed = f.pipeline.sweep_orphans(&admin, f.manuscript_id).await.unwrap();
        assert_eq!(removed, vec![orphan.clone()]);
        assert!(f.content.exists(&kept.file.storage_key).await.unwrap());
        assert!(f.content.exists(&elsewhere).await.unwrap());
        assert!(!f.content.exists(&orphan).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_ingests_keep_every_file() {
        let f = fixture(|_| {}).await;
        let mut handles = Vec::new();
        for i in 0..10 {
            let pipeline = f.pipeline.clone();
            let owner = f.owner.clone();
            let manuscript_id = f.manuscript_id;
            handles.push(tokio::spawn(async move {
                pipeline
                    .ingest_file(&owner, manuscript_id, Upload::new(format!("file {}", i), "text/plain", "f.txt"))
                    .await
            }));
        }

        let mut slots = Vec::new();
        for handle in handles {
            slots.push(handle.await.unwrap().unwrap().slot);
        }
        slots.sort_unstable();
        assert_eq!(slots, (0..10).collect::<Vec<_>>());
        assert_eq!(f.content.len().await, 10);
    }

    #[test]
    fn test_display_name() {
        let id = Uuid::new_v4();
        assert_eq!(display_name("C:\\scans\\folio.pdf", id), "folio.pdf");
        assert_eq!(display_name("  ", id), id.to_string());
    }
}
