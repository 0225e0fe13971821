//! Where each record lives in the two stores.
//!
//! ```text
//! users/<owner>/spots/<spotId>                 spot documents
//! users/<owner>/tags/<tag>                     tag index rows {spots: [...]}
//! checkpoints/<owner>/upsertSpot/<id>          upsert checkpoints
//! users/<owner>/spots/<placeId>/<imageId>.png  image blobs
//! ```

use spotbook_store::DocRef;
use spotbook_types::{ImageId, OwnerId, PlaceId, SpotId};

pub const TAG_ROW_FIELD: &str = "spots";
pub const PLACE_ID_FIELD: &str = "placeId";

pub fn spots_collection(owner: &OwnerId) -> String {
    format!("users/{owner}/spots")
}

pub fn tags_collection(owner: &OwnerId) -> String {
    format!("users/{owner}/tags")
}

pub fn checkpoints_collection(owner: &OwnerId) -> String {
    format!("checkpoints/{owner}/upsertSpot")
}

pub fn spot_doc(owner: &OwnerId, spot: &SpotId) -> DocRef {
    DocRef::new(spots_collection(owner), spot.as_str())
}

pub fn tag_doc(owner: &OwnerId, tag: &str) -> DocRef {
    DocRef::new(tags_collection(owner), tag)
}

/// Prefix shared by every image blob of one owner.
pub fn blob_prefix(owner: &OwnerId) -> String {
    format!("users/{owner}/spots/")
}

pub fn image_path(owner: &OwnerId, place: &PlaceId, image: ImageId, extension: &str) -> String {
    format!("users/{owner}/spots/{place}/{image}.{extension}")
}
