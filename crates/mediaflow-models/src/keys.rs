//! Object-store key layout.

use crate::media::MediaId;

/// First pipeline stage: fit the original into a web-sized JPEG.
pub const STEP_RESIZE: &str = "resize";

/// Thumbnail stage.
pub const STEP_THUMBNAIL: &str = "thumbnail";

/// Key under which the client uploads the original.
///
/// The extension is taken from the client-supplied file name and falls back
/// to `.bin`.
pub fn original_key(media_id: &MediaId, file_name: Option<&str>) -> String {
    let ext = file_name
        .and_then(|name| {
            let base = name.rsplit('/').next().unwrap_or(name);
            base.rfind('.').map(|idx| &base[idx..])
        })
        .filter(|ext| ext.len() > 1)
        .unwrap_or(".bin");
    format!("media/{}/original{}", media_id, ext)
}

/// Deterministic artifact key for a (media, step) pair.
pub fn output_key(media_id: &MediaId, step: &str) -> String {
    format!("media/{}/{}.jpg", media_id, step)
}
