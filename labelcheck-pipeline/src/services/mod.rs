//! External collaborators
//!
//! Each collaborator is reached through a narrow trait so coordinators can be
//! driven by HTTP clients in production and by offline stand-ins locally.

pub mod detectors;
pub mod error;
pub mod evaluation_client;
pub mod extraction_client;
pub mod transport;

pub use detectors::{Detection, Detector, RuleDetector};
pub use error::ServiceError;
pub use evaluation_client::{Evaluation, EvaluationService, HttpEvaluationClient, OfflineEvaluator};
pub use extraction_client::{ExtractionService, FixtureExtractionService, HttpExtractionClient};
pub use transport::{
    ChannelTransport, Delivery, Dispatcher, DispatcherOptions, HttpPushTransport,
    MessageTransport, PipelineMessage, QueueTransport,
};
