pub mod classifier;
pub mod config;
pub mod domain;
pub mod errors;
pub mod signal;
pub mod window;

pub use classifier::{Classifier, ClassifierError, DetectorCommand, Verdict};
pub use domain::message::{ChatMessage, MessageOrigin, MessageTs};
pub use domain::state::{CommandState, WindowState};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use signal::{
    InMemorySignalPublisher, NoopSignalPublisher, PublishError, SignalPayload, SignalPublisher,
};
pub use window::{
    FixedDraw, RandomDraw, SeededDraw, SignalPath, ThreadRngDraw, WindowDecision, WindowPolicy,
};
