use std::sync::Arc;

use serde_json::Value;
use spotbook_store::{DocumentStore, QueryOp};
use spotbook_types::{OwnerId, PlaceId, SpotId};
use tracing::debug;

use crate::error::{SpotError, SpotResult};
use crate::layout::{self, PLACE_ID_FIELD};

/// Enforces that no two spots of the same owner share a place id.
///
/// The check is a plain query followed, much later, by the upsert's atomic
/// commit. Two concurrent upserts for the same new place id can both pass
/// it and both commit.
#[derive(Clone)]
pub struct IdentityResolver {
    docs: Arc<dyn DocumentStore>,
}

impl IdentityResolver {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Succeed if no spot of `owner` uses `place`, or the only one that does
    /// is `excluding` (the spot being edited).
    pub async fn check_unique(
        &self,
        owner: &OwnerId,
        place: &PlaceId,
        excluding: Option<&SpotId>,
    ) -> SpotResult<()> {
        let hits = self
            .docs
            .query(
                &layout::spots_collection(owner),
                PLACE_ID_FIELD,
                QueryOp::Equal,
                &Value::String(place.to_string()),
            )
            .await
            .map_err(SpotError::Lookup)?;

        let clash = hits
            .iter()
            .find(|doc| excluding.map_or(true, |skip| doc.id() != skip.as_str()));
        if let Some(doc) = clash {
            let existing =
                SpotId::new(doc.id()).map_err(|e| SpotError::corrupt(doc.reference.path(), e))?;
            return Err(SpotError::Conflict {
                place_id: place.clone(),
                existing,
            });
        }
        debug!(%owner, %place, "place id is unique");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spotbook_store::InMemoryDocumentStore;

    fn setup() -> (Arc<InMemoryDocumentStore>, IdentityResolver, OwnerId) {
        let docs = Arc::new(InMemoryDocumentStore::new());
        let owner = OwnerId::new("u1").unwrap();
        docs.insert(layout::spot_doc(&owner, &SpotId::new("s1").unwrap()), json!({"placeId": "p1"}));
        let resolver = IdentityResolver::new(docs.clone());
        (docs, resolver, owner)
    }

    #[tokio::test]
    async fn unused_place_passes() {
        let (_, resolver, owner) = setup();
        let place = PlaceId::new("p2").unwrap();
        resolver.check_unique(&owner, &place, None).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_place_conflicts() {
        let (_, resolver, owner) = setup();
        let place = PlaceId::new("p1").unwrap();
        let err = resolver.check_unique(&owner, &place, None).await.unwrap_err();
        match err {
            SpotError::Conflict { existing, .. } => assert_eq!(existing.as_str(), "s1"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spot_being_edited_is_excluded() {
        let (_, resolver, owner) = setup();
        let place = PlaceId::new("p1").unwrap();
        let editing = SpotId::new("s1").unwrap();
        resolver.check_unique(&owner, &place, Some(&editing)).await.unwrap();

        let other = SpotId::new("s9").unwrap();
        assert!(resolver.check_unique(&owner, &place, Some(&other)).await.is_err());
    }

    #[tokio::test]
    async fn other_owners_do_not_conflict() {
        let (_, resolver, _) = setup();
        let place = PlaceId::new("p1").unwrap();
        let u2 = OwnerId::new("u2").unwrap();
        resolver.check_unique(&u2, &place, None).await.unwrap();
    }

    #[tokio::test]
    async fn read_failure_is_lookup_error() {
        let (docs, resolver, owner) = setup();
        docs.fail_reads(true);
        let place = PlaceId::new("p2").unwrap();
        let err = resolver.check_unique(&owner, &place, None).await.unwrap_err();
        assert!(matches!(err, SpotError::Lookup(_)));
    }
}
