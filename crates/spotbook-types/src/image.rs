use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Randomly generated numeric token naming one image blob.
///
/// Unique within a spot's image set at the time it is generated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(u32);

impl ImageId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Extract the image id from the last segment of a storage path.
    ///
    /// `users/u1/spots/p1/5204236.png` yields `5204236`.
    pub fn from_storage_path(path: &str) -> Result<Self, TypeError> {
        let file = path.rsplit('/').next().unwrap_or(path);
        let stem = file.split('.').next().unwrap_or(file);
        stem.parse::<u32>()
            .map(Self)
            .map_err(|_| TypeError::InvalidImagePath(path.to_string()))
    }
}

impl fmt::Debug for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageId({})", self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored photo attached to a spot.
///
/// `storage_path` is the identity of the image; `url` is the download
/// reference the blob store handed back after upload and is derived data.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub url: String,
    pub storage_path: String,
}

impl Image {
    pub fn new(storage_path: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            storage_path: storage_path.into(),
            url: url.into(),
        }
    }

    /// The numeric id encoded in this image's storage path, if it has one.
    pub fn image_id(&self) -> Option<ImageId> {
        ImageId::from_storage_path(&self.storage_path).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_id_from_path() {
        let id = ImageId::from_storage_path("users/u1/spots/p1/5204236.png").unwrap();
        assert_eq!(id.value(), 5204236);
        assert_eq!(ImageId::from_storage_path("42").unwrap(), ImageId::new(42));
    }

    #[test]
    fn image_id_rejects_non_numeric() {
        assert!(matches!(
            ImageId::from_storage_path("users/u1/spots/p1/cover.png"),
            Err(TypeError::InvalidImagePath(_))
        ));
    }

    #[test]
    fn image_uses_camel_case_fields() {
        let image = Image::new("users/u1/spots/p1/7.png", "file:///blobs/7.png");
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(json["storagePath"], "users/u1/spots/p1/7.png");
        assert_eq!(json["url"], "file:///blobs/7.png");
        assert_eq!(image.image_id(), Some(ImageId::new(7)));
    }
}
