//! Lock state of one open note view
//!
//! A [`NoteLockSession`] lives exactly as long as the note view. It owns the
//! session password and every plaintext file materialized while the note is
//! unlocked, and it removes those files on every exit path: explicit
//! [`NoteLockSession::close`], app backgrounding, a dropped unlock future, or
//! the session itself being dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use super::attachments::AttachmentLockManager;
use super::payload::{
    parse_lock_payload, parse_lock_payload_strict, LockedAttachmentDescriptor, NoteLockPayload,
    LOCK_PAYLOAD_VERSION,
};
use crate::encryption::{
    lock_payload, unlock_payload_with_inline, LockError, LockResult, SecureNotePayload,
    SessionPassword,
};
use crate::storage::{plain_text_preview, Attachment, NoteRecord};

/// Markup shown in place of a locked note's content
pub const LOCKED_CONTENT_PLACEHOLDER: &str = "<p>🔒 Protected note</p>";

/// Preview text shown in place of a locked note's plain text
pub const LOCKED_PREVIEW_PLACEHOLDER: &str = "Locked note - password required";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LockState {
    /// Locked and waiting for a password
    Locked,
    /// Decrypting; progress runs over the attachments from 0.0 to 1.0
    Unlocking { progress: f32 },
    /// Content is available, or the note was never locked
    Unlocked,
    /// The lock field cannot be decoded; no password will open this note
    Invalid,
    Closed,
}

/// Decrypted content handed to the view
#[derive(Debug, Clone, PartialEq)]
pub struct UnlockedNote {
    pub payload: SecureNotePayload,
    /// Plaintext copies in the staging area, in stored order
    pub attachments: Vec<Attachment>,
}

struct SessionInner {
    state: LockState,
    is_locked: bool,
    lock_payload: Option<String>,
    password: Option<SessionPassword>,
    staged: Vec<Attachment>,
    /// Bumped by close, suspend and commit so in-flight unlocks notice
    generation: u64,
}

pub struct NoteLockSession {
    note_id: Uuid,
    manager: AttachmentLockManager,
    inner: Mutex<SessionInner>,
    busy: AtomicBool,
}

impl NoteLockSession {
    /// Open a session for the note view showing `record`
    pub fn open(record: &NoteRecord, manager: AttachmentLockManager) -> Self {
        let state = if record.is_locked {
            LockState::Locked
        } else {
            LockState::Unlocked
        };

        Self {
            note_id: record.id,
            manager,
            inner: Mutex::new(SessionInner {
                state,
                is_locked: record.is_locked,
                lock_payload: record.lock_payload.clone(),
                password: None,
                staged: Vec::new(),
                generation: 0,
            }),
            busy: AtomicBool::new(false),
        }
    }

    pub fn note_id(&self) -> Uuid {
        self.note_id
    }

    pub fn state(&self) -> LockState {
        self.inner().state
    }

    /// Whether a password is cached for re-saving without a prompt
    pub fn has_session_password(&self) -> bool {
        self.inner().password.is_some()
    }

    /// Plaintext attachments currently materialized for this view
    pub fn staged_attachments(&self) -> Vec<Attachment> {
        self.inner().staged.clone()
    }

    /// Decrypt the note with `password`.
    ///
    /// The structured payload is checked first; attachments are only touched
    /// once it authenticates. Attachments are decrypted one at a time in
    /// stored order, calling `on_progress((i + 1) / n)` after each and
    /// yielding to the scheduler in between. Key derivation and decryption
    /// run on the blocking pool. Inline attachments of legacy notes are
    /// decoded straight into staging without progress calls. Any failure
    /// removes the files staged by this attempt and returns the session to
    /// `Locked` (or `Invalid` when the lock field itself is unusable).
    pub async fn unlock<F>(&self, password: &str, on_progress: F) -> LockResult<UnlockedNote>
    where
        F: FnMut(f32),
    {
        let _busy = BusyGuard::acquire(&self.busy)?;
        self.unlock_with(SessionPassword::new(password), on_progress).await
    }

    /// Pick up an externally changed note record. With a cached password the
    /// note is decrypted again without prompting; returns `None` when the
    /// view has to ask for a password or the note is no longer locked.
    pub async fn refresh<F>(&self, record: &NoteRecord, on_progress: F) -> LockResult<Option<UnlockedNote>>
    where
        F: FnMut(f32),
    {
        let _busy = BusyGuard::acquire(&self.busy)?;

        let password = {
            let mut inner = self.inner();
            if inner.state == LockState::Closed {
                return Err(LockError::InvalidState("session is closed".to_string()));
            }
            inner.is_locked = record.is_locked;
            inner.lock_payload = record.lock_payload.clone();

            let cached = if record.is_locked { inner.password.clone() } else { None };
            match cached {
                Some(password) => password,
                None => {
                    if !record.is_locked {
                        inner.password = None;
                    }
                    inner.state = if record.is_locked {
                        LockState::Locked
                    } else {
                        LockState::Unlocked
                    };
                    inner.generation += 1;
                    let staged = std::mem::take(&mut inner.staged);
                    drop(inner);
                    self.manager.staging().discard(&staged);
                    return Ok(None);
                }
            }
        };

        match self.unlock_with(password, on_progress).await {
            Ok(unlocked) => Ok(Some(unlocked)),
            Err(e) => {
                if e.is_wrong_password() {
                    self.inner().password = None;
                }
                Err(e)
            }
        }
    }

    async fn unlock_with<F>(&self, password: SessionPassword, mut on_progress: F) -> LockResult<UnlockedNote>
    where
        F: FnMut(f32),
    {
        let (raw, generation, previous) = {
            let mut inner = self.inner();
            match inner.state {
                LockState::Closed => {
                    return Err(LockError::InvalidState("session is closed".to_string()))
                }
                LockState::Unlocking { .. } => return Err(LockError::OperationInProgress),
                _ => {}
            }
            if !inner.is_locked {
                return Err(LockError::InvalidState("note is not locked".to_string()));
            }
            inner.generation += 1;
            (
                inner.lock_payload.clone(),
                inner.generation,
                std::mem::take(&mut inner.staged),
            )
        };
        // Copies from an earlier unlock of this view are replaced, not kept
        self.manager.staging().discard(&previous);

        let lock = match parse_lock_payload_strict(raw.as_deref()) {
            Ok(lock) => lock,
            Err(e) => {
                log::warn!("Note {} cannot be unlocked: {}", self.note_id, e);
                self.inner().state = LockState::Invalid;
                return Err(e);
            }
        };

        self.inner().state = LockState::Unlocking { progress: 0.0 };
        let mut attempt = UnlockAttempt::new(self, generation);

        let envelope = lock.payload.clone();
        let key = password.clone();
        let decrypted =
            run_blocking(move || unlock_payload_with_inline(key.expose(), &envelope)).await;
        let (payload, inline) = match decrypted {
            Ok(decrypted) => decrypted,
            Err(e) => {
                if e.is_unrecoverable() {
                    attempt.fallback = LockState::Invalid;
                }
                log::info!("Unlock of note {} rejected: {}", self.note_id, e);
                return Err(e);
            }
        };

        if !lock.attachments.is_empty() {
            let total = lock.attachments.len();
            for (index, descriptor) in lock.attachments.iter().enumerate() {
                let manager = self.manager.clone();
                let owned = descriptor.clone();
                let key = password.clone();
                // Stage here, not on the blocking pool: every plaintext file
                // must be recorded in the attempt before the next await
                let result = run_blocking(move || manager.decrypt_attachment(&owned, key.expose()))
                    .await
                    .and_then(|plaintext| self.manager.stage_decrypted(descriptor, &plaintext));
                attempt.record(index, total, result)?;
                self.report_progress(&attempt, index, total, &mut on_progress)?;
                tokio::task::yield_now().await;
            }
        } else {
            // Older notes carry their attachments inside the payload itself
            let total = inline.len();
            for (index, embedded) in inline.iter().enumerate() {
                let result = self.manager.staging().stage_inline(embedded);
                attempt.record(index, total, result)?;
            }
        }

        let mut inner = self.inner();
        if inner.generation != generation || inner.state == LockState::Closed {
            drop(inner);
            return Err(LockError::InvalidState(
                "session was closed during unlock".to_string(),
            ));
        }
        let attachments = attempt.finish();
        inner.staged = attachments.clone();
        inner.password = Some(password);
        inner.state = LockState::Unlocked;
        drop(inner);

        log::info!(
            "Unlocked note {} with {} attachment(s)",
            self.note_id,
            attachments.len()
        );
        Ok(UnlockedNote {
            payload,
            attachments,
        })
    }

    fn report_progress<F>(
        &self,
        attempt: &UnlockAttempt<'_>,
        index: usize,
        total: usize,
        on_progress: &mut F,
    ) -> LockResult<()>
    where
        F: FnMut(f32),
    {
        let progress = (index + 1) as f32 / total as f32;
        {
            let mut inner = self.inner();
            if inner.generation != attempt.generation || inner.state == LockState::Closed {
                return Err(LockError::InvalidState(
                    "session was closed during unlock".to_string(),
                ));
            }
            inner.state = LockState::Unlocking { progress };
        }
        on_progress(progress);
        Ok(())
    }

    /// Encrypt a draft for saving with the lock on.
    ///
    /// Attachments are encrypted first, one at a time with progress. If any
    /// of them fails, every encrypted file created by this call is removed
    /// and nothing is returned. The old encrypted files and the plaintext
    /// attachments are only removed by [`NoteLockSession::commit`], after the
    /// caller has persisted the returned record.
    pub async fn seal<F>(
        &self,
        draft: &NoteRecord,
        password: Option<&str>,
        mut on_progress: F,
    ) -> LockResult<PendingSave>
    where
        F: FnMut(f32),
    {
        let _busy = BusyGuard::acquire(&self.busy)?;

        let (password, previous) = {
            let inner = self.inner();
            if inner.state != LockState::Unlocked {
                return Err(LockError::InvalidState(format!(
                    "cannot save a note in state {:?}",
                    inner.state
                )));
            }
            let password = match password {
                Some("") => return Err(LockError::PasswordRequired),
                Some(password) => SessionPassword::new(password),
                None => inner.password.clone().ok_or(LockError::PasswordRequired)?,
            };
            (password, parse_lock_payload(inner.lock_payload.as_deref()))
        };

        let mut pending = PendingSave::new(self.manager.clone());

        let total = draft.attachments.len();
        for (index, attachment) in draft.attachments.iter().enumerate() {
            let manager = self.manager.clone();
            let owned = attachment.clone();
            let key = password.clone();
            let result = run_blocking(move || manager.encrypt_attachment(&owned, key.expose()))
                .await
                .and_then(|encrypted| self.manager.write_encrypted(encrypted));
            match result {
                Ok(descriptor) => pending.created_locked.push(descriptor),
                Err(e) => {
                    log::warn!(
                        "Encrypting attachment {} of note {} failed, rolling back",
                        attachment.id,
                        self.note_id
                    );
                    return Err(batch_error(index, total, e));
                }
            }
            on_progress((index + 1) as f32 / total as f32);
            tokio::task::yield_now().await;
        }

        let payload = secure_payload_from(draft);
        let key = password.clone();
        let envelope = run_blocking(move || lock_payload(key.expose(), &payload)).await?;
        let raw = NoteLockPayload::new(envelope, pending.created_locked.clone()).to_json()?;

        pending.record = NoteRecord {
            content: LOCKED_CONTENT_PLACEHOLDER.to_string(),
            plain_text: LOCKED_PREVIEW_PLACEHOLDER.to_string(),
            checklist: Vec::new(),
            attachments: Vec::new(),
            links: Vec::new(),
            is_locked: true,
            lock_payload: Some(raw),
            lock_version: Some(LOCK_PAYLOAD_VERSION),
            updated_at: Utc::now(),
            ..draft.clone()
        };
        pending.obsolete_locked = previous.map(|p| p.attachments).unwrap_or_default();
        pending.obsolete_plaintext = draft.attachments.clone();
        pending.password = Some(password);

        log::info!(
            "Sealed note {} with {} encrypted attachment(s)",
            self.note_id,
            pending.created_locked.len()
        );
        Ok(pending)
    }

    /// Prepare a draft for saving with the lock turned off. Staged plaintext
    /// copies are moved into the permanent attachment store; the encrypted
    /// files are removed on commit.
    pub fn unseal(&self, draft: &NoteRecord) -> LockResult<PendingSave> {
        let _busy = BusyGuard::acquire(&self.busy)?;

        let previous = {
            let inner = self.inner();
            if inner.state != LockState::Unlocked {
                return Err(LockError::InvalidState(format!(
                    "cannot save a note in state {:?}",
                    inner.state
                )));
            }
            parse_lock_payload(inner.lock_payload.as_deref())
        };

        let mut pending = PendingSave::new(self.manager.clone());
        let mut attachments = Vec::with_capacity(draft.attachments.len());
        for attachment in &draft.attachments {
            let promoted = self.manager.promote(attachment)?;
            if promoted.uri != attachment.uri {
                pending.created_plaintext.push(promoted.clone());
                pending.obsolete_plaintext.push(attachment.clone());
            }
            attachments.push(promoted);
        }

        pending.record = NoteRecord {
            plain_text: plain_text_preview(&draft.content),
            links: draft.links.iter().filter_map(|l| l.normalized()).collect(),
            attachments,
            is_locked: false,
            lock_payload: None,
            lock_version: None,
            updated_at: Utc::now(),
            ..draft.clone()
        };
        pending.obsolete_locked = previous.map(|p| p.attachments).unwrap_or_default();
        Ok(pending)
    }

    /// Finish a save after the record from [`seal`](Self::seal) or
    /// [`unseal`](Self::unseal) has been persisted: remove what the new
    /// record no longer references and drop this view's staged copies.
    ///
    /// A sealed note goes back to `Locked` with the password cached, so the
    /// next [`refresh`](Self::refresh) decrypts it without a prompt.
    pub fn commit(&self, mut pending: PendingSave) {
        pending.settled = true;
        self.manager
            .remove_locked_attachments(&pending.obsolete_locked);
        self.manager
            .remove_plaintext_attachments(&pending.obsolete_plaintext);

        let staged = {
            let mut inner = self.inner();
            inner.is_locked = pending.record.is_locked;
            inner.lock_payload = pending.record.lock_payload.clone();
            inner.generation += 1;
            if inner.state != LockState::Closed {
                if pending.record.is_locked {
                    inner.password = pending.password.take();
                    inner.state = LockState::Locked;
                } else {
                    inner.password = None;
                    inner.state = LockState::Unlocked;
                }
            }
            std::mem::take(&mut inner.staged)
        };
        self.manager.staging().discard(&staged);
    }

    /// The app went to the background: plaintext must not stay on disk.
    /// The password stays cached so the view can [`refresh`](Self::refresh)
    /// when it comes back.
    pub fn suspend(&self) {
        let staged = {
            let mut inner = self.inner();
            inner.generation += 1;
            if inner.is_locked && inner.state != LockState::Closed {
                inner.state = if inner.state == LockState::Invalid {
                    LockState::Invalid
                } else {
                    LockState::Locked
                };
            }
            std::mem::take(&mut inner.staged)
        };
        if !staged.is_empty() {
            log::info!("Suspending note {}, removing {} staged file(s)", self.note_id, staged.len());
        }
        self.manager.staging().discard(&staged);
    }

    /// Close the view: remove staged plaintext and forget the password.
    /// Safe to call more than once.
    pub fn close(&self) {
        let staged = {
            let mut inner = self.inner();
            inner.generation += 1;
            inner.password = None;
            inner.state = LockState::Closed;
            std::mem::take(&mut inner.staged)
        };
        self.manager.staging().discard(&staged);
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for NoteLockSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Outcome of [`NoteLockSession::seal`] or [`NoteLockSession::unseal`]
/// waiting to be persisted. Dropping it without a commit removes the files
/// it created, so a failed save never leaves a half-migrated note behind.
#[must_use = "commit the save or drop it to roll back"]
pub struct PendingSave {
    pub record: NoteRecord,
    manager: AttachmentLockManager,
    created_locked: Vec<LockedAttachmentDescriptor>,
    created_plaintext: Vec<Attachment>,
    obsolete_locked: Vec<LockedAttachmentDescriptor>,
    obsolete_plaintext: Vec<Attachment>,
    password: Option<SessionPassword>,
    settled: bool,
}

impl PendingSave {
    fn new(manager: AttachmentLockManager) -> Self {
        Self {
            record: NoteRecord::new(String::new()),
            manager,
            created_locked: Vec::new(),
            created_plaintext: Vec::new(),
            obsolete_locked: Vec::new(),
            obsolete_plaintext: Vec::new(),
            password: None,
            settled: false,
        }
    }

    /// Encrypted files created for the new record
    pub fn created_descriptors(&self) -> &[LockedAttachmentDescriptor] {
        &self.created_locked
    }

    /// Undo the files created for this save
    pub fn rollback(mut self) {
        self.undo();
    }

    fn undo(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        if !self.created_locked.is_empty() || !self.created_plaintext.is_empty() {
            log::info!(
                "Rolling back {} encrypted and {} plaintext file(s)",
                self.created_locked.len(),
                self.created_plaintext.len()
            );
        }
        self.manager.remove_locked_attachments(&self.created_locked);
        self.manager
            .remove_plaintext_attachments(&self.created_plaintext);
    }
}

impl Drop for PendingSave {
    fn drop(&mut self) {
        self.undo();
    }
}

/// Staged files of one unlock attempt. Unless [`finish`](Self::finish) is
/// reached, dropping it removes them and puts the session back to
/// `fallback`, which also covers a cancelled unlock future.
struct UnlockAttempt<'a> {
    session: &'a NoteLockSession,
    generation: u64,
    staged: Vec<Attachment>,
    fallback: LockState,
    finished: bool,
}

impl<'a> UnlockAttempt<'a> {
    fn new(session: &'a NoteLockSession, generation: u64) -> Self {
        Self {
            session,
            generation,
            staged: Vec::new(),
            fallback: LockState::Locked,
            finished: false,
        }
    }

    fn record(&mut self, index: usize, total: usize, result: LockResult<Attachment>) -> LockResult<()> {
        match result {
            Ok(attachment) => {
                self.staged.push(attachment);
                Ok(())
            }
            Err(e) => {
                if e.is_unrecoverable() {
                    self.fallback = LockState::Invalid;
                }
                log::warn!(
                    "Attachment {} of {} failed for note {}: {}",
                    index + 1,
                    total,
                    self.session.note_id,
                    e
                );
                Err(batch_error(index, total, e))
            }
        }
    }

    fn finish(mut self) -> Vec<Attachment> {
        self.finished = true;
        std::mem::take(&mut self.staged)
    }
}

impl Drop for UnlockAttempt<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.session.manager.staging().discard(&self.staged);

        let mut inner = self.session.inner();
        if inner.generation == self.generation && inner.state != LockState::Closed {
            inner.state = self.fallback;
        }
    }
}

/// Clears the in-flight flag on every exit path
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> LockResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| LockError::OperationInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Run scrypt and cipher work on tokio's blocking pool
async fn run_blocking<T, F>(work: F) -> LockResult<T>
where
    F: FnOnce() -> LockResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LockError::BackgroundTask(e.to_string()))?
}

fn batch_error(index: usize, total: usize, source: LockError) -> LockError {
    if index == 0 {
        source
    } else {
        LockError::PartialBatchFailure {
            index,
            total,
            source: Box::new(source),
        }
    }
}

/// The preview is always derived from content; drafts of a locked record
/// still carry the placeholder
fn secure_payload_from(draft: &NoteRecord) -> SecureNotePayload {
    SecureNotePayload {
        content: draft.content.clone(),
        plain_text: plain_text_preview(&draft.content),
        checklist: draft.checklist.clone(),
        links: draft.links.iter().filter_map(|l| l.normalized()).collect(),
    }
}
