use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkItem {
    pub id: String,
    pub label: String,
    pub url: String,
}

impl LinkItem {
    /// Trim label and url. Returns `None` when both end up empty.
    pub fn normalized(&self) -> Option<LinkItem> {
        let label = self.label.trim();
        let url = self.url.trim();
        if label.is_empty() && url.is_empty() {
            return None;
        }
        Some(LinkItem {
            id: self.id.clone(),
            label: label.to_string(),
            url: url.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
}

impl AttachmentKind {
    /// File extension used when an attachment carries no usable name
    pub fn default_extension(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "jpg",
            AttachmentKind::Audio => "m4a",
            AttachmentKind::Video => "mp4",
        }
    }

    pub fn mime_type_for(&self, extension: &str) -> String {
        match self {
            AttachmentKind::Image => format!("image/{}", extension),
            AttachmentKind::Audio => format!("audio/{}", extension),
            AttachmentKind::Video => format!("video/{}", extension),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Audio => "audio",
            AttachmentKind::Video => "video",
        }
    }
}

/// A media file attached to a note. `uri` is a filesystem path, either
/// absolute or relative to the storage root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Attachment {
    /// Extension taken from the display name, falling back to the kind default
    pub fn extension(&self) -> String {
        extension_from_name(self.name.as_deref(), self.kind)
    }
}

/// Attachment with its bytes embedded as base64, as written by older
/// versions of the app inside the encrypted payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InlineAttachment {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

pub fn extension_from_name(name: Option<&str>, kind: AttachmentKind) -> String {
    name.and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| kind.default_extension().to_string())
}

/// A note as persisted by the note store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub plain_text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub links: Vec<LinkItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub is_locked: bool,
    /// Opaque lock field holding the serialized lock payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_version: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NoteRecord {
    pub fn new(title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            content: String::new(),
            plain_text: String::new(),
            tags: Vec::new(),
            checklist: Vec::new(),
            attachments: Vec::new(),
            links: Vec::new(),
            color: None,
            pinned: false,
            is_locked: false,
            lock_payload: None,
            lock_version: None,
            created_at: now,
            updated_at: now,
        }
    }
}
