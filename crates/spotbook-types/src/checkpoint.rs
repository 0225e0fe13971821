use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{PlaceId, SpotId};

/// Intent record written before an upsert mutates any blob.
///
/// Deleted in the same atomic batch that finalizes the spot. A checkpoint
/// that outlives its operation marks an upsert that was interrupted between
/// the checkpoint write and the final commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub spot_id: SpotId,
    pub place_id: PlaceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_place_id: Option<PlaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editing_spot_id: Option<SpotId>,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint for creating a new spot.
    pub fn for_create(spot_id: SpotId, place_id: PlaceId, timestamp: DateTime<Utc>) -> Self {
        Self {
            spot_id,
            place_id,
            old_place_id: None,
            editing_spot_id: None,
            timestamp,
        }
    }

    /// Checkpoint for editing an existing spot.
    pub fn for_edit(
        spot_id: SpotId,
        place_id: PlaceId,
        old_place_id: PlaceId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            editing_spot_id: Some(spot_id.clone()),
            spot_id,
            place_id,
            old_place_id: Some(old_place_id),
            timestamp,
        }
    }

    pub fn is_edit(&self) -> bool {
        self.editing_spot_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_checkpoint_omits_edit_fields() {
        let cp = Checkpoint::for_create(
            SpotId::new("s1").unwrap(),
            PlaceId::new("p1").unwrap(),
            Utc::now(),
        );
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["spotId"], "s1");
        assert!(json.get("oldPlaceId").is_none());
        assert!(json.get("editingSpotId").is_none());
        assert!(!cp.is_edit());
    }

    #[test]
    fn edit_checkpoint_roundtrip() {
        let cp = Checkpoint::for_edit(
            SpotId::new("s1").unwrap(),
            PlaceId::new("p2").unwrap(),
            PlaceId::new("p1").unwrap(),
            Utc::now(),
        );
        assert!(cp.is_edit());
        let json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["oldPlaceId"], "p1");
        assert_eq!(json["editingSpotId"], "s1");
        let back: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, cp);
    }
}
