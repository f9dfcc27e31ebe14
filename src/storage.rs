//! Local upload storage. Files land in the configured uploads directory
//! with uuid names; existence is re-checked at every use because the
//! directory can change underneath the database, a vanished file just drops
//! out of sends and listings.

use std::fs;
use std::path::Path;

use bytes::Bytes;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct SavedUpload {
    pub file_path: String,
    pub content_type: Option<String>,
}

pub fn ensure_uploads_dir(dir: &Path) -> AppResult<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Persist one uploaded file. The stored name is a fresh uuid plus the
/// original extension; the original name is otherwise discarded.
pub fn save_upload(uploads_dir: &Path, original_name: &str, data: Bytes) -> AppResult<SavedUpload> {
    if data.is_empty() {
        return Err(AppError::BadRequest("uploaded file is empty".into()));
    }

    ensure_uploads_dir(uploads_dir)?;
    let mut filename = uuid::Uuid::now_v7().to_string();
    if let Some(ext) = sanitized_extension(original_name) {
        filename.push('.');
        filename.push_str(&ext);
    }
    let path = uploads_dir.join(filename);

    fs::write(&path, &data)?;

    let content_type = mime_guess::from_path(&path)
        .first()
        .map(|mime| mime.to_string());

    Ok(SavedUpload {
        file_path: path.to_string_lossy().into_owned(),
        content_type,
    })
}

/// Does this attachment path point at a readable regular file right now?
pub fn file_exists(path: &str) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}

/// Remove a stored file. Missing files are fine, the record is what matters.
pub fn delete_file(path: &str) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path, error = %e, "failed to remove upload");
        }
    }
}

fn sanitized_extension(original_name: &str) -> Option<String> {
    let ext = original_name.rsplit('.').next()?;
    if ext == original_name || ext.is_empty() || ext.len() > 10 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_writes_file_and_guesses_type() {
        let temp = TempDir::new().unwrap();
        let saved = save_upload(temp.path(), "photo.PNG", Bytes::from_static(b"fake")).unwrap();

        assert!(file_exists(&saved.file_path));
        assert!(saved.file_path.ends_with(".png"));
        assert_eq!(saved.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn empty_upload_is_rejected() {
        let temp = TempDir::new().unwrap();
        let err = save_upload(temp.path(), "x.png", Bytes::new()).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn odd_names_lose_their_extension() {
        let temp = TempDir::new().unwrap();
        let saved = save_upload(
            temp.path(),
            "../../etc/passwd.d/../x",
            Bytes::from_static(b"data"),
        )
        .unwrap();

        // Stored under the uploads dir with a uuid name, no path traversal.
        assert!(saved.file_path.starts_with(temp.path().to_str().unwrap()));
        assert!(saved.content_type.is_none());
    }

    #[test]
    fn existence_check_is_live() {
        let temp = TempDir::new().unwrap();
        let saved = save_upload(temp.path(), "note.txt", Bytes::from_static(b"hi")).unwrap();
        assert!(file_exists(&saved.file_path));

        fs::remove_file(&saved.file_path).unwrap();
        assert!(!file_exists(&saved.file_path));

        // Deleting again is a no-op.
        delete_file(&saved.file_path);
    }
}
