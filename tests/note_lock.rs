use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tempfile::TempDir;

use notelock::encryption::{derive_key, encrypt, generate_nonce, generate_salt, EncryptedEnvelope};
use notelock::lock::{parse_lock_payload, LOCKED_CONTENT_PLACEHOLDER, LOCKED_PREVIEW_PLACEHOLDER};
use notelock::storage::{
    Attachment, AttachmentKind, FileStore, JsonNoteStore, LocalFileStore, NoteRecord, NoteStore,
};
use notelock::{LockConfig, LockError, LockState, NoteLockService};

/// Local store that can be told to fail encrypted writes
struct FlakyFileStore {
    inner: LocalFileStore,
    locked_writes: AtomicUsize,
    fail_locked_write: usize,
}

impl FileStore for FlakyFileStore {
    fn root(&self) -> &Path {
        self.inner.root()
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        if path.starts_with("locked-attachments") {
            let n = self.locked_writes.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_locked_write {
                // Leave a truncated file behind like a full disk would
                self.inner.write(path, &data[..data.len() / 2])?;
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
        }
        self.inner.write(path, data)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.inner.remove(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.list(dir)
    }
}

struct Fixture {
    service: NoteLockService,
    files: Arc<dyn FileStore>,
    _temp: TempDir,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(temp.path().to_path_buf()));
    fixture_with(temp, files)
}

fn fixture_with(temp: TempDir, files: Arc<dyn FileStore>) -> Fixture {
    let config = LockConfig::new(temp.path());
    let notes: Arc<dyn NoteStore> = Arc::new(JsonNoteStore::new(temp.path().join("notes")));
    let service = NoteLockService::new(notes, Arc::clone(&files), &config);
    Fixture {
        service,
        files,
        _temp: temp,
    }
}

impl Fixture {
    fn attachment(&self, id: &str, bytes: &[u8]) -> Attachment {
        let uri = format!("attachments/{}.jpg", id);
        self.files.write(Path::new(&uri), bytes).unwrap();
        Attachment {
            id: id.to_string(),
            kind: AttachmentKind::Image,
            uri,
            name: Some(format!("{}.jpg", id)),
            mime_type: Some("image/jpeg".to_string()),
        }
    }

    fn note(&self, content: &str, attachments: usize) -> NoteRecord {
        let mut note = NoteRecord::new("Diary".to_string());
        note.content = content.to_string();
        note.attachments = (0..attachments)
            .map(|i| self.attachment(&format!("a{}", i + 1), format!("bytes {}", i + 1).as_bytes()))
            .collect();
        self.service.notes().put(&note).unwrap();
        note
    }

    fn count(&self, dir: &str) -> usize {
        self.files.list(Path::new(dir)).unwrap().len()
    }

    async fn locked_note(&self, content: &str, attachments: usize, password: &str) -> NoteRecord {
        let note = self.note(content, attachments);
        let session = self.service.open_session(note.id).unwrap();
        self.service
            .save_locked(&session, &note, Some(password), |_| {})
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_lock_then_unlock() {
    let fx = fixture();
    let saved = fx.locked_note("<p>hi</p>", 0, "correcthorse").await;

    assert!(saved.is_locked);
    assert_eq!(saved.content, LOCKED_CONTENT_PLACEHOLDER);
    assert_eq!(saved.plain_text, LOCKED_PREVIEW_PLACEHOLDER);
    assert_eq!(fx.service.notes().get(saved.id).unwrap(), saved);

    let session = fx.service.open_session(saved.id).unwrap();
    assert_eq!(session.state(), LockState::Locked);

    let unlocked = session.unlock("correcthorse", |_| {}).await.unwrap();
    assert_eq!(unlocked.payload.content, "<p>hi</p>");
    assert_eq!(unlocked.payload.plain_text, "hi");
    assert!(unlocked.attachments.is_empty());
    assert_eq!(session.state(), LockState::Unlocked);
    assert!(session.has_session_password());
}

#[tokio::test]
async fn test_wrong_password_stays_locked() {
    let fx = fixture();
    let saved = fx.locked_note("<p>hi</p>", 2, "correcthorse").await;
    let session = fx.service.open_session(saved.id).unwrap();

    let mut calls = 0;
    let err = session.unlock("wrong", |_| calls += 1).await.unwrap_err();
    assert!(matches!(err, LockError::AuthenticationFailure));
    assert_eq!(calls, 0);
    assert_eq!(session.state(), LockState::Locked);
    assert!(!session.has_session_password());
    assert_eq!(fx.count("unlocked-staging"), 0);
}

#[tokio::test]
async fn test_attachments_round_trip_with_progress() {
    let fx = fixture();
    let note = fx.note("<p>trip</p>", 4);
    let session = fx.service.open_session(note.id).unwrap();

    let mut sealing = Vec::new();
    let saved = fx
        .service
        .save_locked(&session, &note, Some("pw"), |p| sealing.push(p))
        .await
        .unwrap();
    assert_eq!(sealing, vec![0.25, 0.5, 0.75, 1.0]);
    assert_eq!(fx.count("attachments"), 0);
    assert_eq!(fx.count("locked-attachments"), 4);
    assert_eq!(session.state(), LockState::Locked);

    let lock = parse_lock_payload(saved.lock_payload.as_deref()).unwrap();
    let salts: Vec<_> = lock.attachments.iter().map(|d| d.salt.clone()).collect();
    assert!(salts.iter().enumerate().all(|(i, s)| !salts[..i].contains(s)));

    let mut progress = Vec::new();
    let unlocked = session.unlock("pw", |p| progress.push(p)).await.unwrap();

    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last(), Some(&1.0));

    assert_eq!(unlocked.attachments.len(), 4);
    for (i, attachment) in unlocked.attachments.iter().enumerate() {
        assert_eq!(attachment.id, format!("a{}", i + 1));
        assert!(attachment.uri.starts_with("unlocked-staging/"));
        assert_eq!(
            fx.files.read(Path::new(&attachment.uri)).unwrap(),
            format!("bytes {}", i + 1).as_bytes()
        );
    }
    // Unlocking never touches the encrypted files
    assert_eq!(fx.count("locked-attachments"), 4);
}

#[tokio::test]
async fn test_seal_failure_rolls_back() {
    let fx = fixture();
    let note = fx.note("<p>five</p>", 5);
    fx.files.remove(Path::new(&note.attachments[2].uri)).unwrap();

    let session = fx.service.open_session(note.id).unwrap();
    let err = fx
        .service
        .save_locked(&session, &note, Some("pw"), |_| {})
        .await
        .unwrap_err();

    match err {
        LockError::PartialBatchFailure { index, total, source } => {
            assert_eq!(index, 2);
            assert_eq!(total, 5);
            assert!(matches!(*source, LockError::AttachmentIo { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    // Files written for attachments 1 and 2 are gone, originals untouched
    assert_eq!(fx.count("locked-attachments"), 0);
    assert_eq!(fx.count("attachments"), 4);
    let stored = fx.service.notes().get(note.id).unwrap();
    assert!(!stored.is_locked);
    assert_eq!(stored.lock_payload, None);
    assert_eq!(session.state(), LockState::Unlocked);
}

#[tokio::test]
async fn test_partial_write_is_cleaned_up() {
    let temp = TempDir::new().unwrap();
    let files: Arc<dyn FileStore> = Arc::new(FlakyFileStore {
        inner: LocalFileStore::new(temp.path().to_path_buf()),
        locked_writes: AtomicUsize::new(0),
        fail_locked_write: 2,
    });
    let fx = fixture_with(temp, files);
    let note = fx.note("<p>three</p>", 3);

    let session = fx.service.open_session(note.id).unwrap();
    let err = fx
        .service
        .save_locked(&session, &note, Some("pw"), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LockError::PartialBatchFailure { index: 1, total: 3, .. }
    ));
    assert_eq!(fx.count("locked-attachments"), 0);
    assert_eq!(fx.count("attachments"), 3);
}

#[tokio::test]
async fn test_unlock_failure_mid_batch_cleans_staging() {
    let fx = fixture();
    let saved = fx.locked_note("<p>x</p>", 3, "pw").await;
    let lock = parse_lock_payload(saved.lock_payload.as_deref()).unwrap();
    fx.files.remove(Path::new(&lock.attachments[1].file)).unwrap();

    let session = fx.service.open_session(saved.id).unwrap();
    let mut progress = Vec::new();
    let err = session.unlock("pw", |p| progress.push(p)).await.unwrap_err();

    assert!(matches!(
        err,
        LockError::PartialBatchFailure { index: 1, total: 3, .. }
    ));
    assert_eq!(progress.len(), 1);
    assert_eq!(fx.count("unlocked-staging"), 0);
    assert_eq!(session.state(), LockState::Locked);
}

#[tokio::test]
async fn test_close_and_drop_remove_staged_files() {
    let fx = fixture();
    let saved = fx.locked_note("<p>x</p>", 2, "pw").await;

    let session = fx.service.open_session(saved.id).unwrap();
    session.unlock("pw", |_| {}).await.unwrap();
    assert_eq!(fx.count("unlocked-staging"), 2);

    session.close();
    assert_eq!(fx.count("unlocked-staging"), 0);
    assert_eq!(session.state(), LockState::Closed);
    assert!(!session.has_session_password());
    session.close();

    let session = fx.service.open_session(saved.id).unwrap();
    session.unlock("pw", |_| {}).await.unwrap();
    assert_eq!(fx.count("unlocked-staging"), 2);
    drop(session);
    assert_eq!(fx.count("unlocked-staging"), 0);
}

#[tokio::test]
async fn test_suspend_then_refresh_uses_cached_password() {
    let fx = fixture();
    let saved = fx.locked_note("<p>again</p>", 1, "pw").await;

    let session = fx.service.open_session(saved.id).unwrap();
    session.unlock("pw", |_| {}).await.unwrap();

    session.suspend();
    assert_eq!(session.state(), LockState::Locked);
    assert_eq!(fx.count("unlocked-staging"), 0);
    assert!(session.has_session_password());

    let refreshed = session.refresh(&saved, |_| {}).await.unwrap().unwrap();
    assert_eq!(refreshed.payload.content, "<p>again</p>");
    assert_eq!(fx.count("unlocked-staging"), 1);
}

#[tokio::test]
async fn test_reentrant_calls_are_rejected() {
    let fx = fixture();
    let saved = fx.locked_note("<p>x</p>", 2, "pw").await;
    let session = fx.service.open_session(saved.id).unwrap();

    let nested = RefCell::new(Vec::new());
    session
        .unlock("pw", |_| nested.borrow_mut().push(session.unseal(&saved).err()))
        .await
        .unwrap();
    let nested = nested.into_inner();
    assert_eq!(nested.len(), 2);
    assert!(nested
        .iter()
        .all(|e| matches!(e, Some(LockError::OperationInProgress))));

    session.suspend();
    let (first, second) = tokio::join!(
        session.unlock("pw", |_| {}),
        session.unlock("pw", |_| {})
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(LockError::OperationInProgress)));
}

#[tokio::test]
async fn test_cancelled_unlock_cleans_staging() {
    let fx = fixture();
    let saved = fx.locked_note("<p>x</p>", 5, "pw").await;
    let session = fx.service.open_session(saved.id).unwrap();

    let decrypted = AtomicUsize::new(0);
    {
        let unlock = session.unlock("pw", |_| {
            decrypted.fetch_add(1, Ordering::SeqCst);
        });
        tokio::pin!(unlock);
        // Each poll advances at most one attachment, so this stops well
        // before all five are staged
        while decrypted.load(Ordering::SeqCst) < 2 {
            tokio::select! {
                biased;
                _ = &mut unlock => panic!("unlock should still be running"),
                _ = tokio::task::yield_now() => {}
            }
        }
        assert!(fx.count("unlocked-staging") >= 2);
    }

    assert_eq!(fx.count("unlocked-staging"), 0);
    assert_eq!(session.state(), LockState::Locked);
}

#[tokio::test]
async fn test_legacy_inline_attachments() {
    let fx = fixture();

    let plaintext = serde_json::json!({
        "content": "<p>old</p>",
        "plainText": "old",
        "checklist": [{"id": "c1", "text": "milk", "done": false}],
        "links": [],
        "attachments": [
            {"id": "i1", "type": "audio", "name": "memo.m4a", "data": BASE64.encode(b"memo")},
            {"id": "i2", "type": "image", "data": BASE64.encode(b"pic")}
        ]
    })
    .to_string();
    let salt = generate_salt();
    let nonce = generate_nonce();
    let key = derive_key("pw", &salt).unwrap();
    let ciphertext = encrypt(&key, &nonce, plaintext.as_bytes()).unwrap();
    // Bare envelope without a version, as the oldest notes stored it
    let envelope = EncryptedEnvelope {
        version: 1,
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    };
    let mut raw: serde_json::Value = serde_json::to_value(&envelope).unwrap();
    raw.as_object_mut().unwrap().remove("version");

    let mut note = NoteRecord::new("Old".to_string());
    note.is_locked = true;
    note.lock_payload = Some(raw.to_string());
    fx.service.notes().put(&note).unwrap();

    let session = fx.service.open_session(note.id).unwrap();
    let mut progress = Vec::new();
    let unlocked = session.unlock("pw", |p| progress.push(p)).await.unwrap();

    assert_eq!(unlocked.payload.content, "<p>old</p>");
    assert_eq!(unlocked.payload.checklist.len(), 1);
    assert!(progress.is_empty());
    assert_eq!(unlocked.attachments.len(), 2);
    assert_eq!(unlocked.attachments[0].kind, AttachmentKind::Audio);
    assert_eq!(unlocked.attachments[0].name.as_deref(), Some("memo.m4a"));
    assert_eq!(unlocked.attachments[1].name.as_deref(), Some("image-i2.jpg"));
    assert_eq!(
        fx.files.read(Path::new(&unlocked.attachments[1].uri)).unwrap(),
        b"pic"
    );

    // Saving again migrates the note to per-attachment files
    let mut draft = note.clone();
    draft.content = unlocked.payload.content.clone();
    draft.attachments = unlocked.attachments.clone();
    let resaved = fx
        .service
        .save_locked(&session, &draft, None, |_| {})
        .await
        .unwrap();
    let lock = parse_lock_payload(resaved.lock_payload.as_deref()).unwrap();
    assert!(!lock.is_legacy());
    assert_eq!(lock.attachments.len(), 2);
    assert_eq!(fx.count("unlocked-staging"), 0);
}

#[tokio::test]
async fn test_unparseable_lock_field_is_invalid() {
    let fx = fixture();
    let mut note = NoteRecord::new("Broken".to_string());
    note.is_locked = true;
    note.lock_payload = Some("{\"foo\":1}".to_string());
    fx.service.notes().put(&note).unwrap();

    let session = fx.service.open_session(note.id).unwrap();
    let err = session.unlock("pw", |_| {}).await.unwrap_err();
    assert!(matches!(err, LockError::InvalidEnvelope(_)));
    assert!(!err.is_wrong_password());
    assert_eq!(session.state(), LockState::Invalid);
}

#[tokio::test]
async fn test_change_password_replaces_encrypted_files() {
    let fx = fixture();
    let saved = fx.locked_note("<p>x</p>", 2, "old").await;
    let before = parse_lock_payload(saved.lock_payload.as_deref()).unwrap();

    let session = fx.service.open_session(saved.id).unwrap();
    let unlocked = session.unlock("old", |_| {}).await.unwrap();
    let mut draft = saved.clone();
    draft.content = unlocked.payload.content.clone();
    draft.attachments = unlocked.attachments.clone();

    let resaved = fx
        .service
        .save_locked(&session, &draft, Some("new"), |_| {})
        .await
        .unwrap();
    let after = parse_lock_payload(resaved.lock_payload.as_deref()).unwrap();

    for old in &before.attachments {
        assert!(!fx.files.exists(Path::new(&old.file)));
    }
    assert_eq!(fx.count("locked-attachments"), 2);
    assert!(after.attachments.iter().all(|d| fx.files.exists(Path::new(&d.file))));

    let session = fx.service.open_session(saved.id).unwrap();
    assert!(session.unlock("old", |_| {}).await.unwrap_err().is_wrong_password());
    session.unlock("new", |_| {}).await.unwrap();
}

#[tokio::test]
async fn test_delete_locked_note_removes_files() {
    let fx = fixture();
    let saved = fx.locked_note("<p>x</p>", 3, "pw").await;
    assert_eq!(fx.count("locked-attachments"), 3);

    fx.service.delete_note(saved.id).unwrap();
    assert_eq!(fx.count("locked-attachments"), 0);
    assert!(fx.service.notes().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_attachments_outside_root_survive_save_and_delete() {
    let fx = fixture();
    let outside = TempDir::new().unwrap();
    let photo = outside.path().join("holiday.jpg");
    std::fs::write(&photo, b"camera roll").unwrap();

    let mut note = fx.note("<p>trip</p>", 1);
    note.attachments.push(Attachment {
        id: "roll".to_string(),
        kind: AttachmentKind::Image,
        uri: format!("file://{}", photo.display()),
        name: Some("holiday.jpg".to_string()),
        mime_type: Some("image/jpeg".to_string()),
    });
    fx.service.notes().put(&note).unwrap();

    let session = fx.service.open_session(note.id).unwrap();
    let saved = fx
        .service
        .save_locked(&session, &note, Some("pw"), |_| {})
        .await
        .unwrap();

    // Both were encrypted, only the copy inside the store was removed
    assert_eq!(fx.count("locked-attachments"), 2);
    assert_eq!(fx.count("attachments"), 0);
    assert_eq!(std::fs::read(&photo).unwrap(), b"camera roll");

    let unlocked = session.unlock("pw", |_| {}).await.unwrap();
    assert_eq!(
        fx.files.read(Path::new(&unlocked.attachments[1].uri)).unwrap(),
        b"camera roll"
    );
    drop(session);

    let mut plain = NoteRecord::new("Linked".to_string());
    plain.attachments = vec![note.attachments[1].clone()];
    fx.service.notes().put(&plain).unwrap();
    fx.service.delete_note(plain.id).unwrap();
    fx.service.delete_note(saved.id).unwrap();

    assert!(photo.exists());
    assert_eq!(fx.count("locked-attachments"), 0);
}

#[tokio::test]
async fn test_preview_text_is_derived_from_content() {
    let fx = fixture();
    let mut note = fx.note("<p>fresh <b>words</b></p>", 0);
    note.plain_text = "stale preview".to_string();

    let session = fx.service.open_session(note.id).unwrap();
    let saved = fx
        .service
        .save_locked(&session, &note, Some("pw"), |_| {})
        .await
        .unwrap();
    assert_eq!(saved.plain_text, LOCKED_PREVIEW_PLACEHOLDER);

    let unlocked = session.unlock("pw", |_| {}).await.unwrap();
    assert_eq!(unlocked.payload.plain_text, "fresh words");

    let mut draft = saved.clone();
    draft.content = "<p>now public</p>".to_string();
    let plain = fx.service.save_unlocked(&session, &draft).unwrap();
    assert_eq!(plain.plain_text, "now public");
}
