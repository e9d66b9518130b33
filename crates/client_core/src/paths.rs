use shared::domain::{FileId, UserId};

pub const TEMPLATE_PREFIX: &str = "templates";
const BLOB_ROOT: &str = "userFiles";

pub fn profile_path(user_id: &UserId) -> String {
    format!("users/{user_id}")
}

pub fn uploads_collection(user_id: &UserId) -> String {
    format!("users/{user_id}/uploads")
}

pub fn record_path(user_id: &UserId, file_id: &FileId) -> String {
    format!("users/{user_id}/uploads/{file_id}")
}

pub fn blob_path(user_id: &UserId, file_id: &FileId) -> String {
    format!("{BLOB_ROOT}/{user_id}/{file_id}")
}

/// Splits `userFiles/{uid}/{id}` back into its owner and record id.
pub fn parse_blob_path(path: &str) -> Option<(UserId, FileId)> {
    let mut parts = path.split('/');
    let root = parts.next()?;
    let user_id = parts.next()?;
    let file_id = parts.next()?;
    if root != BLOB_ROOT || user_id.is_empty() || file_id.is_empty() || parts.next().is_some() {
        return None;
    }
    Some((UserId::new(user_id), FileId::new(file_id)))
}
