use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use perch_core::domain::entity::{
    Channel, EventSubject, NewNotice, NoticeSource, NoticeTarget, ServerId, User,
};
use perch_core::domain::event::{nick_from_mask, ChatEvent};
use perch_core::domain::message::{GenericMessage, NewMessage};
use perch_db::Store;

use crate::router::{EventContext, EventHandler, EventHandlerError};

/// Persists every transport event. Public channel messages are forwarded to
/// the intake sink once they are stored, so plugins only ever see messages
/// that already have an id.
pub struct EntityRecorder {
    store: Store,
    server_id: ServerId,
    intake: Option<mpsc::UnboundedSender<GenericMessage>>,
}

impl EntityRecorder {
    pub fn new(store: Store, server_id: ServerId) -> Self {
        Self { store, server_id, intake: None }
    }

    pub fn with_intake(mut self, intake: mpsc::UnboundedSender<GenericMessage>) -> Self {
        self.intake = Some(intake);
        self
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    async fn channel(&self, name: &str) -> Result<Channel, EventHandlerError> {
        self.store
            .channels
            .find_by_name(name)
            .await?
            .ok_or_else(|| EventHandlerError::not_found("channel", name))
    }

    async fn existing_user(&self, nick: &str) -> Result<User, EventHandlerError> {
        self.store
            .users
            .find_by_name(nick)
            .await?
            .ok_or_else(|| EventHandlerError::not_found("user", nick))
    }

    /// Stores a channel message. The channel must already exist; the sender
    /// is created on first sight.
    pub async fn record_public(
        &self,
        sender: &str,
        channel: &str,
        content: &str,
        is_action: bool,
    ) -> Result<GenericMessage, EventHandlerError> {
        let channel_record = self.channel(channel).await?;
        let user = self.store.users.find_or_create(sender).await?;
        let message = if is_action {
            NewMessage::action(user.id, channel_record.id, content)
        } else {
            NewMessage::public(user.id, channel_record.id, content)
        };
        let saved = self.store.messages.save(message).await?;

        Ok(GenericMessage {
            id: saved.id,
            sender: user.name,
            channel: channel_record.name,
            content: saved.content,
        })
    }

    pub async fn record_private(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
    ) -> Result<(), EventHandlerError> {
        let from = self.store.users.find_or_create(sender).await?;
        let to = self.store.users.find_or_create(recipient).await?;
        self.store.messages.save(NewMessage::private(from.id, to.id, content)).await?;
        Ok(())
    }

    async fn join(&self, channel: &str, nick: &str) -> Result<(), EventHandlerError> {
        let user = self.store.users.find_or_create(nick).await?;
        let channel = self.store.channels.find_or_create(channel, self.server_id).await?;
        self.store.channels.add_member(channel.id, user.id).await?;
        Ok(())
    }

    async fn part(&self, channel: &str, nick: &str) -> Result<(), EventHandlerError> {
        let channel = self.channel(channel).await?;
        let user = self.existing_user(nick).await?;
        self.store.channels.remove_member(channel.id, user.id).await?;
        Ok(())
    }

    async fn names(&self, channel: &str, nicks: &[String]) -> Result<(), EventHandlerError> {
        let channel = self.store.channels.find_or_create(channel, self.server_id).await?;
        for nick in nicks {
            let nick = nick.trim_start_matches(['@', '+', '%', '~', '&']);
            if nick.is_empty() {
                continue;
            }
            let user = self.store.users.find_or_create(nick).await?;
            self.store.channels.add_member(channel.id, user.id).await?;
        }
        Ok(())
    }

    async fn topic(&self, channel: &str, topic: &str, set_by: &str) -> Result<(), EventHandlerError> {
        let channel = self.channel(channel).await?;
        let nick = nick_from_mask(set_by).ok_or_else(|| EventHandlerError::not_found("user", set_by))?;
        let user = self.store.users.find_or_create(nick).await?;
        if self.store.topics.exists(channel.id, user.id, topic).await? {
            debug!(event_name = "chat.topic.duplicate", channel = %channel.name, "topic already recorded");
            return Ok(());
        }
        self.store.topics.save(channel.id, user.id, topic).await?;
        Ok(())
    }

    async fn user_mode(
        &self,
        channel: &str,
        by: &str,
        mode: &str,
        target: Option<&str>,
        added: bool,
    ) -> Result<(), EventHandlerError> {
        self.channel(channel).await?;
        self.existing_user(by).await?;
        if let Some(target) = target {
            self.existing_user(target).await?;
        }
        info!(
            event_name = "chat.user_mode.changed",
            channel,
            by,
            mode,
            target = target.unwrap_or("none"),
            added,
            "user mode changed"
        );
        Ok(())
    }

    async fn nick_change(&self, old_nick: &str, new_nick: &str) -> Result<(), EventHandlerError> {
        let affected = self.store.users.rename(old_nick, new_nick).await?;
        if affected == 0 {
            return Err(EventHandlerError::not_found("user", old_nick));
        }
        Ok(())
    }

    async fn notice(
        &self,
        from: Option<&str>,
        to: &str,
        content: &str,
    ) -> Result<(), EventHandlerError> {
        let from = match from.and_then(nick_from_mask) {
            Some(nick) => NoticeSource::User(self.store.users.find_or_create(nick).await?.id),
            None => NoticeSource::Server(self.server_id),
        };
        let to = if to.starts_with('#') {
            NoticeTarget::Channel(self.channel(to).await?.id)
        } else {
            NoticeTarget::User(self.store.users.find_or_create(to).await?.id)
        };
        self.store.notices.save(NewNotice { content: content.to_string(), from, to }).await?;
        Ok(())
    }

    async fn kick(&self, channel: &str, nick: &str, event: &ChatEvent) -> Result<(), EventHandlerError> {
        let channel = self.channel(channel).await?;
        if let Some(user) = self.store.users.find_by_name(nick).await? {
            self.store.channels.remove_member(channel.id, user.id).await?;
        }
        self.store.events.append(EventSubject::Channel(channel.id), event.to_record()).await?;
        Ok(())
    }

    async fn quit(&self, nick: &str, channels: &[String], event: &ChatEvent) -> Result<(), EventHandlerError> {
        let user = self.existing_user(nick).await?;
        for name in channels {
            if let Some(channel) = self.store.channels.find_by_name(name).await? {
                self.store.channels.remove_member(channel.id, user.id).await?;
            }
        }
        self.store.events.append(EventSubject::User(user.id), event.to_record()).await?;
        Ok(())
    }

    /// Hands a stored public message to the intake sink, if one is attached.
    pub fn forward(&self, message: GenericMessage) {
        let Some(intake) = &self.intake else {
            return;
        };
        if intake.send(message).is_err() {
            warn!(event_name = "chat.intake.closed", "message intake closed; plugins will not run");
        }
    }
}

#[async_trait]
impl EventHandler for EntityRecorder {
    async fn handle(&self, event: &ChatEvent, ctx: &EventContext) -> Result<(), EventHandlerError> {
        debug!(
            event_name = "chat.event.recording",
            event_type = event.kind().as_str(),
            correlation_id = %ctx.correlation_id,
            "recording chat event"
        );

        match event {
            ChatEvent::PublicMessage { sender, channel, content } => {
                let message = self.record_public(sender, channel, content, false).await?;
                self.forward(message);
                Ok(())
            }
            ChatEvent::Action { sender, channel, content } => {
                self.record_public(sender, channel, content, true).await.map(|_| ())
            }
            ChatEvent::PrivateMessage { sender, recipient, content } => {
                self.record_private(sender, recipient, content).await
            }
            ChatEvent::Join { channel, nick } => self.join(channel, nick).await,
            ChatEvent::Part { channel, nick, .. } => self.part(channel, nick).await,
            ChatEvent::Names { channel, nicks } => self.names(channel, nicks).await,
            ChatEvent::Topic { channel, topic, set_by } => self.topic(channel, topic, set_by).await,
            ChatEvent::ChannelMode { channel, mode } => {
                let channel = self.channel(channel).await?;
                self.store.channels.set_mode(channel.id, mode).await?;
                Ok(())
            }
            ChatEvent::UserMode { channel, by, mode, target, added } => {
                self.user_mode(channel, by, mode, target.as_deref(), *added).await
            }
            ChatEvent::NickChange { old_nick, new_nick } => self.nick_change(old_nick, new_nick).await,
            ChatEvent::Notice { from, to, content } => self.notice(from.as_deref(), to, content).await,
            ChatEvent::Motd { motd } => {
                self.store.servers.update_motd(self.server_id, motd).await?;
                Ok(())
            }
            ChatEvent::Kick { channel, nick, .. } => self.kick(channel, nick, event).await,
            ChatEvent::Invite { to, .. } => {
                let user = self.store.users.find_or_create(to).await?;
                self.store.events.append(EventSubject::User(user.id), event.to_record()).await?;
                Ok(())
            }
            ChatEvent::Quit { nick, channels, .. } => self.quit(nick, channels, event).await,
            ChatEvent::Connection { .. } | ChatEvent::Error { .. } => {
                self.store.events.append(EventSubject::Server(self.server_id), event.to_record()).await?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use perch_core::domain::entity::{EventSubject, NewServer, ServerId};
    use perch_core::domain::event::{ChatEvent, ConnectionStatus};
    use perch_db::{connect_with_settings, migrations, Store};
    use tokio::sync::mpsc;

    use super::EntityRecorder;
    use crate::router::{EventContext, EventHandler, EventHandlerError};

    async fn setup() -> (Store, ServerId) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let store = Store::sql(pool);
        let server = store
            .servers
            .find_or_create(NewServer::new("irc.example.net", 6697, true))
            .await
            .expect("server");
        (store, server.id)
    }

    fn text(value: &str) -> String {
        value.to_string()
    }

    #[tokio::test]
    async fn join_then_part_updates_membership() {
        let (store, server_id) = setup().await;
        let recorder = EntityRecorder::new(store.clone(), server_id);
        let ctx = EventContext::default();

        recorder
            .handle(&ChatEvent::Join { channel: text("#perch"), nick: text("alice") }, &ctx)
            .await
            .expect("join");
        recorder
            .handle(&ChatEvent::Names { channel: text("#perch"), nicks: vec![text("@op"), text("+bob")] }, &ctx)
            .await
            .expect("names");

        let channel = store.channels.find_by_name("#perch").await.expect("find").expect("channel");
        let names: Vec<String> =
            store.channels.members(channel.id).await.expect("members").into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["alice", "bob", "op"]);

        recorder
            .handle(&ChatEvent::Part { channel: text("#perch"), nick: text("alice"), reason: None }, &ctx)
            .await
            .expect("part");
        assert_eq!(store.channels.members(channel.id).await.expect("members").len(), 2);
    }

    #[tokio::test]
    async fn public_message_to_unknown_channel_is_not_found_and_not_forwarded() {
        let (store, server_id) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = EntityRecorder::new(store.clone(), server_id).with_intake(tx);

        let error = recorder
            .handle(
                &ChatEvent::PublicMessage { sender: text("alice"), channel: text("#nowhere"), content: text("hi") },
                &EventContext::default(),
            )
            .await
            .expect_err("unknown channel");

        assert!(matches!(error, EventHandlerError::NotFound { entity: "channel", .. }));
        assert_eq!(store.messages.count().await.expect("count"), 0);
        assert!(store.users.find_by_name("alice").await.expect("find").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn public_messages_are_forwarded_after_persistence() {
        let (store, server_id) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let recorder = EntityRecorder::new(store.clone(), server_id).with_intake(tx);
        let ctx = EventContext::default();

        recorder
            .handle(&ChatEvent::Join { channel: text("#perch"), nick: text("perch") }, &ctx)
            .await
            .expect("join");
        recorder
            .handle(&ChatEvent::Action { sender: text("bob"), channel: text("#perch"), content: text("waves") }, &ctx)
            .await
            .expect("action");
        recorder
            .handle(
                &ChatEvent::PublicMessage { sender: text("alice"), channel: text("#perch"), content: text("hello") },
                &ctx,
            )
            .await
            .expect("message");

        let forwarded = rx.try_recv().expect("forwarded message");
        assert_eq!(forwarded.sender, "alice");
        assert_eq!(forwarded.channel, "#perch");
        assert!(rx.try_recv().is_err(), "actions are stored but not forwarded");
        assert_eq!(store.messages.count().await.expect("count"), 2);
    }

    #[tokio::test]
    async fn nick_change_for_unknown_user_is_not_found() {
        let (store, server_id) = setup().await;
        let recorder = EntityRecorder::new(store.clone(), server_id);

        let error = recorder
            .handle(
                &ChatEvent::NickChange { old_nick: text("ghost"), new_nick: text("spirit") },
                &EventContext::default(),
            )
            .await
            .expect_err("unknown user");
        assert!(matches!(error, EventHandlerError::NotFound { entity: "user", .. }));

        store.users.find_or_create("alice").await.expect("alice");
        recorder
            .handle(
                &ChatEvent::NickChange { old_nick: text("alice"), new_nick: text("alicia") },
                &EventContext::default(),
            )
            .await
            .expect("rename");
        assert!(store.users.find_by_name("alicia").await.expect("find").is_some());
    }

    #[tokio::test]
    async fn topics_are_deduplicated_and_server_events_logged() {
        let (store, server_id) = setup().await;
        let recorder = EntityRecorder::new(store.clone(), server_id);
        let ctx = EventContext::default();

        recorder
            .handle(&ChatEvent::Join { channel: text("#perch"), nick: text("op") }, &ctx)
            .await
            .expect("join");
        let topic = ChatEvent::Topic {
            channel: text("#perch"),
            topic: text("welcome"),
            set_by: text("op!op@example.net"),
        };
        recorder.handle(&topic, &ctx).await.expect("first topic");
        recorder.handle(&topic, &ctx).await.expect("repeated topic");

        let channel = store.channels.find_by_name("#perch").await.expect("find").expect("channel");
        let latest = store.topics.latest(channel.id).await.expect("latest").expect("topic");
        assert_eq!(latest.topic, "welcome");
        assert_eq!(latest.id, 1);

        recorder
            .handle(&ChatEvent::Connection { status: ConnectionStatus::Registered }, &ctx)
            .await
            .expect("connection");
        recorder
            .handle(&ChatEvent::Error { message: text("connection reset"), network: true }, &ctx)
            .await
            .expect("error");
        let events = store.events.list(EventSubject::Server(server_id)).await.expect("events");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event["message"], "connection reset");
    }

    #[tokio::test]
    async fn server_notices_and_motd_are_recorded() {
        let (store, server_id) = setup().await;
        let recorder = EntityRecorder::new(store.clone(), server_id);
        let ctx = EventContext::default();

        recorder
            .handle(&ChatEvent::Notice { from: None, to: text("perch"), content: text("*** hello") }, &ctx)
            .await
            .expect("notice");
        recorder.handle(&ChatEvent::Motd { motd: text("be nice") }, &ctx).await.expect("motd");

        assert_eq!(store.notices.count().await.expect("count"), 1);
        let server = store.servers.find_by_name("Server irc.example.net:6697").await.expect("find").expect("server");
        assert_eq!(server.motd, "be nice");
    }
}
