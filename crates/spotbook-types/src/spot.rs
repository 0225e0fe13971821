use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::identity::{PlaceId, SpotId};
use crate::image::Image;

/// Fixed set of spot categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Hike,
    Food,
    Accommodation,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Hike, Category::Food, Category::Accommodation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hike => "Hike",
            Self::Food => "Food",
            Self::Accommodation => "Accommodation",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypeError::UnknownCategory(s.to_string()))
    }
}

/// Fixed set of marker icons. The icon also decides the marker color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Icon {
    Favorite,
    CheckCircle,
    ThumbDown,
}

impl Icon {
    pub const ALL: [Icon; 3] = [Icon::Favorite, Icon::CheckCircle, Icon::ThumbDown];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Favorite => "favorite",
            Self::CheckCircle => "check_circle",
            Self::ThumbDown => "thumb_down",
        }
    }

    /// Human-facing rating label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Favorite => "Awesome",
            Self::CheckCircle => "Good",
            Self::ThumbDown => "Naah",
        }
    }

    /// Marker color as a CSS hex string.
    pub fn color(self) -> &'static str {
        match self {
            Self::Favorite => "#ff616f",
            Self::CheckCircle => "#0091ea",
            Self::ThumbDown => "#7b7b7b",
        }
    }
}

impl fmt::Display for Icon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Icon {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s || i.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| TypeError::UnknownIcon(s.to_string()))
    }
}

/// One record per place an owner has saved.
///
/// The spot id is the document key and is not part of the persisted body;
/// it is restored from the key on read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    #[serde(skip)]
    pub id: SpotId,
    pub place_id: PlaceId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub category: Category,
    pub icon: Icon,
    pub tags: BTreeSet<String>,
    pub notes: String,
    /// Ordered; the order is user-significant and preserved across edits.
    pub images: Vec<Image>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Spot {
    /// Decode a spot from a persisted document body and its key.
    pub fn from_value(id: SpotId, value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut spot: Spot = serde_json::from_value(value)?;
        spot.id = id;
        Ok(spot)
    }

    /// Encode the persisted document body (everything but the id).
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Spot {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Spot {
            id: SpotId::new("s1").unwrap(),
            place_id: PlaceId::new("p1").unwrap(),
            name: "Cafe".into(),
            lat: 37.77,
            lng: -122.42,
            category: Category::Food,
            icon: Icon::Favorite,
            tags: ["shade".to_string()].into_iter().collect(),
            notes: String::new(),
            images: vec![Image::new("users/u1/spots/p1/1.png", "url-1")],
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn category_parsing() {
        assert_eq!("food".parse::<Category>().unwrap(), Category::Food);
        assert_eq!("Accommodation".parse::<Category>().unwrap(), Category::Accommodation);
        assert!("Beach".parse::<Category>().is_err());
    }

    #[test]
    fn icon_parsing_accepts_name_or_label() {
        assert_eq!("check_circle".parse::<Icon>().unwrap(), Icon::CheckCircle);
        assert_eq!("naah".parse::<Icon>().unwrap(), Icon::ThumbDown);
        assert!("star".parse::<Icon>().is_err());
        assert_eq!(Icon::Favorite.color(), "#ff616f");
    }

    #[test]
    fn document_body_omits_id() {
        let spot = sample();
        let value = spot.to_value().unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["placeId"], "p1");
        assert_eq!(value["icon"], "favorite");
        assert_eq!(value["category"], "Food");
        assert!(value.get("createdAt").is_some());

        let back = Spot::from_value(SpotId::new("s1").unwrap(), value).unwrap();
        assert_eq!(back, spot);
    }

    #[test]
    fn legacy_string_images_do_not_decode() {
        let mut value = sample().to_value().unwrap();
        value["images"] = serde_json::json!(["https://example.com/o/x.png"]);
        assert!(Spot::from_value(SpotId::new("s1").unwrap(), value).is_err());
    }
}
