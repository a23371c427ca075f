//! Inbound mail ingestion: payload normalization, delivery, webhook fan-out.

pub mod fanout;
pub mod normalize;
pub mod pipeline;
pub mod types;

pub use fanout::{FanOutReport, NewEmailEvent, WebhookFanOut};
pub use normalize::normalize;
pub use pipeline::DeliveryPipeline;
pub use types::{AttachmentMeta, Delivery, DeliveryOutcome, DeliveryState, Envelope};
