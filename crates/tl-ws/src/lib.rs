mod frames;
pub mod hub;
mod service;

pub use frames::{ClientFrame, ServerFrame};
pub use hub::{Attachment, Hub, HubManager, ATTACHMENT_QUEUE_CAPACITY};
pub use service::WsService;
