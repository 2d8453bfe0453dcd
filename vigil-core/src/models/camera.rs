use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display details of a camera, as resolved from the camera directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CameraInfo {
    pub id: Uuid,
    pub camera_id: String,
    pub name: String,
    pub location: String,
}
