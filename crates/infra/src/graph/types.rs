//! Normalized Graph API response types.
//!
//! Graph payloads arrive as loosely-shaped JSON; these types flatten them
//! into what the rest of the application consumes. Missing fields get
//! stable defaults instead of failing the whole response: a message with
//! no subject becomes `(No Subject)`, an unparseable timestamp is passed
//! through raw.

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;

/// Display timestamp format for normalized messages.
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One row in a message search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    /// Graph message ID
    pub id: String,
    /// Subject, `(No Subject)` when absent
    pub subject: String,
    /// Sender as `Name <address>`, address or name alone when one is
    /// missing, `Unknown` when both are
    pub sender: String,
    /// Received time as `YYYY-MM-DD HH:MM:SS`
    pub received: String,
    /// First characters of the body
    pub body_preview: String,
    /// Read flag
    pub is_read: bool,
    /// Attachment flag
    pub has_attachments: bool,
    /// Importance, `normal` when absent
    pub importance: String,
}

impl MessageSummary {
    /// Normalize one entry of a Graph message list.
    #[must_use]
    pub fn from_graph(message: &Value) -> Self {
        Self {
            id: str_field(message, "id"),
            subject: subject_or_default(message),
            sender: display_address(message.get("from")),
            received: format_timestamp(message.get("receivedDateTime")),
            body_preview: str_field(message, "bodyPreview"),
            is_read: bool_field(message, "isRead"),
            has_attachments: bool_field(message, "hasAttachments"),
            importance: importance_or_default(message),
        }
    }
}

/// Message body with its original content type preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageBody {
    /// `text` or `html`, as reported by the API
    pub content_type: String,
    /// Raw body content, not stripped or re-encoded
    pub content: String,
}

/// A single message in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDetail {
    /// Graph message ID
    pub id: String,
    /// Subject, `(No Subject)` when absent
    pub subject: String,
    /// Sender, same formatting as [`MessageSummary::sender`]
    pub sender: String,
    /// To recipients, each formatted like the sender
    pub to: Vec<String>,
    /// Cc recipients
    pub cc: Vec<String>,
    /// Received time as `YYYY-MM-DD HH:MM:SS`
    pub received: String,
    /// Sent time as `YYYY-MM-DD HH:MM:SS`
    pub sent: String,
    /// Full body
    pub body: MessageBody,
    /// First characters of the body
    pub body_preview: String,
    /// Read flag
    pub is_read: bool,
    /// Attachment flag
    pub has_attachments: bool,
    /// Importance, `normal` when absent
    pub importance: String,
    /// User-assigned categories
    pub categories: Vec<String>,
}

impl MessageDetail {
    /// Normalize a full Graph message payload.
    #[must_use]
    pub fn from_graph(message: &Value) -> Self {
        let body = message.get("body");
        Self {
            id: str_field(message, "id"),
            subject: subject_or_default(message),
            sender: display_address(message.get("from")),
            to: recipient_list(message.get("toRecipients")),
            cc: recipient_list(message.get("ccRecipients")),
            received: format_timestamp(message.get("receivedDateTime")),
            sent: format_timestamp(message.get("sentDateTime")),
            body: MessageBody {
                content_type: body
                    .and_then(|b| b.get("contentType"))
                    .and_then(Value::as_str)
                    .unwrap_or("text")
                    .to_string(),
                content: body
                    .and_then(|b| b.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            body_preview: str_field(message, "bodyPreview"),
            is_read: bool_field(message, "isRead"),
            has_attachments: bool_field(message, "hasAttachments"),
            importance: importance_or_default(message),
            categories: message
                .get("categories")
                .and_then(Value::as_array)
                .map(|items| {
                    items.iter().filter_map(Value::as_str).map(str::to_string).collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// The signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    /// Directory object ID
    pub id: String,
    /// Display name, `Unknown User` when absent
    pub display_name: String,
    /// Primary address; falls back to the user principal name
    pub mail: String,
    /// Job title, empty when absent
    pub job_title: String,
    /// Office location, empty when absent
    pub office_location: String,
}

impl UserProfile {
    /// Normalize a `/me` payload.
    #[must_use]
    pub fn from_graph(user: &Value) -> Self {
        let mail = user
            .get("mail")
            .and_then(Value::as_str)
            .or_else(|| user.get("userPrincipalName").and_then(Value::as_str))
            .unwrap_or("Unknown Email")
            .to_string();
        Self {
            id: str_field(user, "id"),
            display_name: user
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or("Unknown User")
                .to_string(),
            mail,
            job_title: str_field(user, "jobTitle"),
            office_location: str_field(user, "officeLocation"),
        }
    }
}

/// One mailbox folder with item counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailFolder {
    /// Graph folder ID
    pub id: String,
    /// Folder display name
    pub display_name: String,
    /// Total messages in the folder
    pub total_item_count: i64,
    /// Unread messages in the folder
    pub unread_item_count: i64,
    /// Parent folder ID, empty at the root
    pub parent_folder_id: String,
}

impl MailFolder {
    /// Normalize one entry of a `/me/mailFolders` page.
    #[must_use]
    pub fn from_graph(folder: &Value) -> Self {
        Self {
            id: str_field(folder, "id"),
            display_name: str_field(folder, "displayName"),
            total_item_count: folder
                .get("totalItemCount")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
            unread_item_count: folder
                .get("unreadItemCount")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
            parent_folder_id: str_field(folder, "parentFolderId"),
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn bool_field(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn subject_or_default(message: &Value) -> String {
    match message.get("subject").and_then(Value::as_str) {
        Some(subject) => subject.to_string(),
        None => "(No Subject)".to_string(),
    }
}

fn importance_or_default(message: &Value) -> String {
    message.get("importance").and_then(Value::as_str).unwrap_or("normal").to_string()
}

/// Format a sender or recipient as `Name <address>`, degrading to
/// whichever part exists.
fn display_address(entry: Option<&Value>) -> String {
    let Some(address_obj) = entry.and_then(|e| e.get("emailAddress")) else {
        return "Unknown".to_string();
    };
    let name = address_obj.get("name").and_then(Value::as_str).unwrap_or_default();
    let address = address_obj.get("address").and_then(Value::as_str).unwrap_or_default();

    match (name.is_empty(), address.is_empty()) {
        (false, false) => format!("{name} <{address}>"),
        (true, false) => address.to_string(),
        (false, true) => name.to_string(),
        (true, true) => "Unknown".to_string(),
    }
}

fn recipient_list(entries: Option<&Value>) -> Vec<String> {
    entries
        .and_then(Value::as_array)
        .map(|items| items.iter().map(|item| display_address(Some(item))).collect())
        .unwrap_or_default()
}

/// Render an ISO-8601 timestamp as `YYYY-MM-DD HH:MM:SS`, passing the raw
/// string through when it does not parse.
fn format_timestamp(value: Option<&Value>) -> String {
    let Some(raw) = value.and_then(Value::as_str) else {
        return "Unknown".to_string();
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.format(DISPLAY_TIME_FORMAT).to_string(),
        Err(_) => raw.to_string(),
    }
}
