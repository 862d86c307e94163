pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod plugin;
pub mod queue;
pub mod retrieval;
pub mod text;
pub mod windowing;

pub use dispatch::{EventLock, SerializedDispatcher};
pub use domain::entity::{
    Channel, ChannelId, EventRecord, EventSubject, NewNotice, NewServer, NoticeSource,
    NoticeTarget, Server, ServerId, Summary, SummaryId, Topic, User, UserId,
};
pub use domain::event::{ChatEvent, ChatEventKind, ConnectionStatus};
pub use domain::message::{
    GenericMessage, Message, MessageId, MessageKind, MessageTarget, NewMessage,
};
pub use errors::{ApplicationError, DomainError};
pub use plugin::{Next, Plugin, PluginChain, PluginContext, PluginError};
pub use queue::{ProcessingQueue, QueueError, TaskHandle, TaskOutcome};
pub use retrieval::{
    Embedder, FieldAggregation, InMemoryVectorIndex, RetrievalAdapter, RetrievalError,
    RetrievalResult, VectorIndex, VectorMatch, VectorRecord,
};
pub use windowing::{segment, Segment, WindowingError};
