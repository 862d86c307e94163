use std::sync::Arc;

use crate::repositories::{
    ChannelRepository, EventRepository, MessageRepository, NoticeRepository, ServerRepository,
    SqlChannelRepository, SqlEventRepository, SqlMessageRepository, SqlNoticeRepository,
    SqlServerRepository, SqlSummaryRepository, SqlTopicRepository, SqlUserRepository,
    SummaryRepository, TopicRepository, UserRepository,
};
use crate::DbPool;

/// Every repository the bot and the tools need, behind trait objects so
/// tests can swap individual stores.
#[derive(Clone)]
pub struct Store {
    pub servers: Arc<dyn ServerRepository>,
    pub users: Arc<dyn UserRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub summaries: Arc<dyn SummaryRepository>,
    pub notices: Arc<dyn NoticeRepository>,
    pub topics: Arc<dyn TopicRepository>,
    pub events: Arc<dyn EventRepository>,
}

impl Store {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            servers: Arc::new(SqlServerRepository::new(pool.clone())),
            users: Arc::new(SqlUserRepository::new(pool.clone())),
            channels: Arc::new(SqlChannelRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            summaries: Arc::new(SqlSummaryRepository::new(pool.clone())),
            notices: Arc::new(SqlNoticeRepository::new(pool.clone())),
            topics: Arc::new(SqlTopicRepository::new(pool.clone())),
            events: Arc::new(SqlEventRepository::new(pool)),
        }
    }
}
