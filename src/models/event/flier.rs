//! Flier images, stored under the media root bucketed by the day of the event.

use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use time::{OffsetDateTime, UtcOffset};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::error::{AppError, AppResult};
use crate::util::sanitize_file_name;

const SAVE_ATTEMPTS: usize = 5;
pub const MAX_FILE_NAME_LENGTH: usize = 100;

/// The path, relative to the media root, a flier for an event hosted at
/// `date_hosted` is stored under: `<fliers>/<YYYY-MM-DD>/<file name>`.
pub fn flier_path(fliers_path: &str, date_hosted: OffsetDateTime, file_name: &str) -> String {
    let day = date_hosted.to_offset(UtcOffset::UTC).date();
    format!("{}/{}/{}", fliers_path.trim_end_matches('/'), day, file_name)
}

pub struct FlierUpload {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl FlierUpload {
    pub fn new(file_name: &str, content: Vec<u8>) -> AppResult<Self> {
        let file_name = sanitize_file_name(file_name)
            .ok_or_else(|| AppError::invalid("flier", "The flier must have a file name."))?;
        if file_name.chars().count() > MAX_FILE_NAME_LENGTH {
            return Err(AppError::invalid(
                "flier",
                format!("The flier's file name may be at most {MAX_FILE_NAME_LENGTH} characters."),
            ));
        }
        if content.is_empty() {
            return Err(AppError::invalid("flier", "The flier image is empty."));
        }

        Ok(Self { file_name, content })
    }

    /// Decodes an upload sent over the API as base64.
    pub fn from_base64(file_name: &str, content: &str) -> AppResult<Self> {
        let content = base64::decode(content.trim())
            .map_err(|err| AppError::invalid("flier", format!("Invalid base64 content: {err}")))?;

        Self::new(file_name, content)
    }

    /// Writes the flier under the media root and returns its relative
    /// path. A name already taken for that day gets a random suffix, so
    /// one event never writes over another's flier.
    pub async fn save(&self, media: &MediaConfig, date_hosted: OffsetDateTime) -> AppResult<String> {
        let mut file_name = self.file_name.clone();
        for _ in 0..SAVE_ATTEMPTS {
            let relative = flier_path(&media.fliers_path, date_hosted, &file_name);
            let path = media.root.join(&relative);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).await?;
            }

            match OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    file.write_all(&self.content).await?;
                    file.flush().await?;
                    info!(path = %path.display(), bytes = self.content.len(), "saved flier");
                    return Ok(relative);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    file_name = with_suffix(&self.file_name);
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free name for flier {}", self.file_name),
        )
        .into())
    }
}

/// `flier.png` becomes `flier_<7 random characters>.png`.
fn with_suffix(file_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let suffix = &suffix[..7];
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}_{suffix}.{extension}"),
        _ => format!("{file_name}_{suffix}"),
    }
}

pub fn absolute_path(media: &MediaConfig, relative: &str) -> PathBuf {
    media.root.join(Path::new(relative))
}

/// Deletes a stored flier. A flier that is already gone is not an error.
pub async fn remove(media: &MediaConfig, relative: &str) {
    let path = absolute_path(media, relative);
    match fs::remove_file(&path).await {
        Ok(()) => info!(path = %path.display(), "removed flier"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), "failed to remove flier: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn fliers_are_bucketed_by_hosted_day() {
        assert_eq!(
            flier_path("fliers", datetime!(2024-03-01 18:30 UTC), "party.png"),
            "fliers/2024-03-01/party.png"
        );
        assert_eq!(
            flier_path("fliers/", datetime!(2024-03-01 23:30 -6), "party.png"),
            "fliers/2024-03-02/party.png"
        );
    }

    #[test]
    fn uploads_need_a_name_and_content() {
        assert!(FlierUpload::new("../", vec![1, 2, 3]).is_err());
        assert!(FlierUpload::new("flier.png", Vec::new()).is_err());
        assert!(FlierUpload::new(&format!("{}.png", "f".repeat(100)), vec![1]).is_err());

        let upload = FlierUpload::from_base64("dir/flier.png", "aGVsbG8=").unwrap();
        assert_eq!(upload.file_name, "flier.png");
        assert_eq!(upload.content, b"hello");
    }

    #[tokio::test]
    async fn saved_fliers_land_under_the_media_root() {
        let root = std::env::temp_dir().join(format!("fliers-{}", uuid::Uuid::new_v4()));
        let media = MediaConfig {
            root: root.clone(),
            fliers_path: "fliers".to_owned(),
        };
        let upload = FlierUpload::new("flier.png", b"png".to_vec()).unwrap();

        let relative = upload
            .save(&media, datetime!(2030-05-04 12:00 UTC))
            .await
            .unwrap();

        assert_eq!(relative, "fliers/2030-05-04/flier.png");
        assert_eq!(
            tokio::fs::read(absolute_path(&media, &relative)).await.unwrap(),
            b"png"
        );
        remove(&media, &relative).await;
        let _ = tokio::fs::remove_dir_all(root).await;
    }

    #[test]
    fn suffixes_keep_the_extension() {
        let renamed = with_suffix("flier.png");
        assert!(renamed.starts_with("flier_"));
        assert!(renamed.ends_with(".png"));
        assert_eq!(renamed.len(), "flier_.png".len() + 7);

        let bare = with_suffix("flier");
        assert!(bare.starts_with("flier_"));
        assert_eq!(bare.len(), "flier_".len() + 7);
    }

    #[tokio::test]
    async fn same_day_uploads_with_one_name_get_their_own_files() {
        let root = std::env::temp_dir().join(format!("fliers-{}", uuid::Uuid::new_v4()));
        let media = MediaConfig {
            root: root.clone(),
            fliers_path: "fliers".to_owned(),
        };
        let day = datetime!(2030-05-04 12:00 UTC);
        let first = FlierUpload::new("flier.png", b"first".to_vec()).unwrap();
        let second = FlierUpload::new("flier.png", b"second".to_vec()).unwrap();

        let first_path = first.save(&media, day).await.unwrap();
        let second_path = second.save(&media, day).await.unwrap();

        assert_eq!(first_path, "fliers/2030-05-04/flier.png");
        assert_ne!(first_path, second_path);
        assert!(second_path.starts_with("fliers/2030-05-04/flier_"));
        assert_eq!(
            tokio::fs::read(absolute_path(&media, &first_path)).await.unwrap(),
            b"first"
        );
        assert_eq!(
            tokio::fs::read(absolute_path(&media, &second_path)).await.unwrap(),
            b"second"
        );
        let _ = tokio::fs::remove_dir_all(root).await;
    }
}
