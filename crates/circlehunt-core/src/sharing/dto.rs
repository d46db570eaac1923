//! Wire types of the sharing API (camelCase JSON).

use crate::geometry::LatLng;
use crate::shapes::Circle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One circle in a share request. Registry IDs are never sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareCircle {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius in meters.
    pub radius: f64,
    pub is_inside: bool,
}

impl From<&Circle> for ShareCircle {
    fn from(circle: &Circle) -> Self {
        Self {
            latitude: circle.center.lat,
            longitude: circle.center.lng,
            radius: circle.radius_meters,
            is_inside: circle.inside,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateShareRequest {
    pub circles: Vec<ShareCircle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareCreated {
    pub share_id: String,
    pub share_url: String,
    #[serde(default)]
    pub message: String,
}

/// A circle as seen by someone viewing a share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedCircle {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub is_inside: bool,
    pub owner_username: String,
    pub created_at: DateTime<Utc>,
}

impl SharedCircle {
    pub fn center(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// A share the viewer accepted. Kept apart from the viewer's own shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedShare {
    pub share_id: String,
    pub owner_username: String,
    pub circles: Vec<SharedCircle>,
    pub visible: bool,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedCheck {
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityUpdate {
    pub visible: bool,
}

/// Plain `{ "message": ... }` body used for errors and acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
