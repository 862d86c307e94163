use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;

use perch_core::domain::event::{ChatEvent, ConnectionStatus};
use perch_core::domain::message::MessageKind;

use crate::transport::{ChatTransport, OutboundMessage, TransportError};

/// A local stand-in for a chat network. Each input line is one event in the
/// configured channel:
///
/// ```text
/// <alice> hello there       public message
/// * alice waves             action
/// /msg alice psst           private message from alice to the bot
/// /join alice               join
/// /part alice [reason]      part
/// /nick alice alicia        nick change
/// /topic alice new topic    topic change
/// ```
///
/// Sends are written back as `[public #channel] text` or `[private nick] text`.
pub struct ConsoleTransport<R, W> {
    channel: String,
    nick: String,
    lines: Mutex<Lines<R>>,
    writer: Mutex<W>,
    pending: Mutex<VecDeque<ChatEvent>>,
}

impl ConsoleTransport<BufReader<Stdin>, Stdout> {
    pub fn stdio(channel: impl Into<String>, nick: impl Into<String>) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), channel, nick)
    }
}

impl<R, W> ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, channel: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            nick: nick.into(),
            lines: Mutex::new(reader.lines()),
            writer: Mutex::new(writer),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn into_writer(self) -> W {
        self.writer.into_inner()
    }
}

/// Parses one console line into an event, or `None` for blank and
/// unrecognized lines.
pub fn parse_console_line(line: &str, channel: &str, nick: &str) -> Option<ChatEvent> {
    let line = line.trim();
    let owned = |value: &str| value.to_string();

    if let Some(rest) = line.strip_prefix('<') {
        let (sender, content) = rest.split_once('>')?;
        let content = content.trim();
        if sender.is_empty() || content.is_empty() {
            return None;
        }
        return Some(ChatEvent::PublicMessage {
            sender: owned(sender),
            channel: owned(channel),
            content: owned(content),
        });
    }

    if let Some(rest) = line.strip_prefix("* ") {
        let (sender, content) = rest.split_once(' ')?;
        return Some(ChatEvent::Action {
            sender: owned(sender),
            channel: owned(channel),
            content: owned(content.trim()),
        });
    }

    let rest = line.strip_prefix('/')?;
    let (command, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    match command {
        "msg" => {
            let (sender, content) = args.split_once(' ')?;
            Some(ChatEvent::PrivateMessage {
                sender: owned(sender),
                recipient: owned(nick),
                content: owned(content.trim()),
            })
        }
        "join" if !args.is_empty() => {
            Some(ChatEvent::Join { channel: owned(channel), nick: owned(args) })
        }
        "part" if !args.is_empty() => {
            let (who, reason) = match args.split_once(' ') {
                Some((who, reason)) => (who, Some(owned(reason.trim()))),
                None => (args, None),
            };
            Some(ChatEvent::Part { channel: owned(channel), nick: owned(who), reason })
        }
        "nick" => {
            let (old_nick, new_nick) = args.split_once(' ')?;
            Some(ChatEvent::NickChange { old_nick: owned(old_nick), new_nick: owned(new_nick.trim()) })
        }
        "topic" => {
            let (who, topic) = args.split_once(' ')?;
            Some(ChatEvent::Topic { channel: owned(channel), topic: owned(topic.trim()), set_by: owned(who) })
        }
        _ => None,
    }
}

#[async_trait]
impl<R, W> ChatTransport for ConsoleTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn connect(&self) -> Result<(), TransportError> {
        let mut pending = self.pending.lock().await;
        pending.push_back(ChatEvent::Connection { status: ConnectionStatus::Connected });
        pending.push_back(ChatEvent::Connection { status: ConnectionStatus::Registered });
        pending.push_back(ChatEvent::Join { channel: self.channel.clone(), nick: self.nick.clone() });
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<ChatEvent>, TransportError> {
        if let Some(event) = self.pending.lock().await.pop_front() {
            return Ok(Some(event));
        }

        let mut lines = self.lines.lock().await;
        loop {
            let line = lines.next_line().await.map_err(|e| TransportError::Receive(e.to_string()))?;
            let Some(line) = line else {
                return Ok(None);
            };
            if let Some(event) = parse_console_line(&line, &self.channel, &self.nick) {
                return Ok(Some(event));
            }
        }
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        let rendered = match message.kind {
            MessageKind::Public => format!("[public {}] {}\n", message.target, message.content),
            MessageKind::Private => format!("[private {}] {}\n", message.target, message.content),
        };
        let mut writer = self.writer.lock().await;
        writer.write_all(rendered.as_bytes()).await.map_err(|e| TransportError::Send(e.to_string()))?;
        writer.flush().await.map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await.map_err(|e| TransportError::Disconnect(e.to_string()))
    }
}
