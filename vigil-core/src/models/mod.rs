pub mod camera;
pub mod person;
pub mod report;

pub use camera::CameraInfo;
pub use person::{PersonRecord, PersonStatus, Priority, StoredEmbedding};
pub use report::{
    AlertDelivery, AlertEvent, AlertMethod, AlertStatus, BoundingBox, CaptureMetadata,
    DetectionReport, NewReport, VerificationStatus,
};
