use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::shared::error::{AppError, AppResult};

pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_ATTACHMENTS: usize = 5;

/// Attachment descriptor persisted on the ticket row. The blob itself lives
/// in the uploads directory and is served statically under `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    pub path: String,
}

pub fn validate_attachment(filename: &str, content_type: &str, size: usize) -> AppResult<()> {
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AppError::Validation(format!(
            "Attachment '{filename}' exceeds the 5 MiB size limit"
        )));
    }
    if !is_allowed_content_type(content_type) {
        return Err(AppError::Validation(format!(
            "Attachment '{filename}' must be an image or a PDF"
        )));
    }
    Ok(())
}

fn is_allowed_content_type(content_type: &str) -> bool {
    content_type.starts_with("image/") || content_type == "application/pdf"
}

/// Keep only the final path component and replace anything that could break
/// out of the uploads directory or the URL.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "unnamed_file".to_string()
    } else {
        cleaned
    }
}

/// Writes the attachment to disk under a timestamp-prefixed name and returns
/// its descriptor. Callers must validate before storing.
pub async fn store_attachment(
    uploads_dir: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> AppResult<AttachmentMeta> {
    let stored_name = format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        sanitize_filename(filename)
    );
    let dest = Path::new(uploads_dir).join(&stored_name);

    tokio::fs::write(&dest, data)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to store attachment: {e}")))?;

    info!(file = %stored_name, size = data.len(), "stored ticket attachment");
    Ok(AttachmentMeta {
        filename: filename.to_string(),
        content_type: content_type.to_string(),
        size: data.len(),
        path: format!("/uploads/{stored_name}"),
    })
}
