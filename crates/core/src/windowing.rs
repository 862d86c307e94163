//! Fixed-size overlapping windows over an ordered conversation history.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::message::{GenericMessage, MessageId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WindowingError {
    #[error("window size must be greater than zero")]
    EmptyWindow,
    #[error("overlap {overlap} must be smaller than window size {window}")]
    OverlapTooLarge { window: usize, overlap: usize },
}

/// Items that can anchor a window by their identifier.
pub trait Anchored {
    fn anchor_id(&self) -> MessageId;
}

impl Anchored for GenericMessage {
    fn anchor_id(&self) -> MessageId {
        self.id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment<T> {
    pub anchor_id: MessageId,
    pub items: Vec<T>,
}

impl Segment<GenericMessage> {
    /// The `sender: content` transcript that gets embedded for this window.
    pub fn transcript(&self) -> String {
        self.items.iter().map(GenericMessage::transcript_line).collect::<Vec<_>>().join("\n")
    }
}

pub fn validate_window(window: usize, overlap: usize) -> Result<(), WindowingError> {
    if window == 0 {
        return Err(WindowingError::EmptyWindow);
    }
    if overlap >= window {
        return Err(WindowingError::OverlapTooLarge { window, overlap });
    }
    Ok(())
}

/// Splits `items` into windows of at most `window` items, each starting
/// `window - overlap` items after the previous one. The final window may
/// be shorter. Empty input yields no windows.
pub fn segment<T>(items: &[T], window: usize, overlap: usize) -> Result<Vec<Segment<T>>, WindowingError>
where
    T: Anchored + Clone,
{
    validate_window(window, overlap)?;
    let step = window - overlap;

    let mut segments = Vec::with_capacity(items.len().div_ceil(step));
    let mut offset = 0;
    while offset < items.len() {
        let end = (offset + window).min(items.len());
        let slice = &items[offset..end];
        segments.push(Segment { anchor_id: slice[0].anchor_id(), items: slice.to_vec() });
        offset += step;
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::domain::message::{GenericMessage, MessageId};

    use super::{segment, WindowingError};

    fn history(count: i64) -> Vec<GenericMessage> {
        (1..=count)
            .map(|id| GenericMessage {
                id: MessageId(id),
                sender: format!("user{}", id % 3),
                channel: "#perch".to_string(),
                content: format!("message {id}"),
            })
            .collect()
    }

    #[test]
    fn thirty_messages_with_twelve_and_three() {
        let messages = history(30);
        let segments = match segment(&messages, 12, 3) {
            Ok(segments) => segments,
            Err(error) => panic!("segmenting failed: {error}"),
        };

        let anchors: Vec<i64> = segments.iter().map(|s| s.anchor_id.0).collect();
        assert_eq!(anchors, vec![1, 10, 19, 28]);
        assert!(segments.iter().all(|s| s.items.len() <= 12));
        assert_eq!(segments.last().map(|s| s.items.len()), Some(3));

        let covered: BTreeSet<i64> =
            segments.iter().flat_map(|s| s.items.iter().map(|m| m.id.0)).collect();
        assert_eq!(covered, (1..=30).collect::<BTreeSet<_>>());

        for pair in segments.windows(2) {
            let left: BTreeSet<i64> = pair[0].items.iter().map(|m| m.id.0).collect();
            let right: BTreeSet<i64> = pair[1].items.iter().map(|m| m.id.0).collect();
            assert_eq!(left.intersection(&right).count(), 3);
        }
    }

    #[test]
    fn each_anchor_is_the_first_item_of_its_window() {
        let messages = history(17);
        let segments = segment(&messages, 5, 2).unwrap_or_default();
        assert!(!segments.is_empty());
        for window in &segments {
            assert_eq!(window.items.first().map(|m| m.id), Some(window.anchor_id));
        }
    }

    #[test]
    fn overlap_equal_or_greater_than_window_is_rejected() {
        let messages = history(10);
        assert_eq!(
            segment(&messages, 5, 5),
            Err(WindowingError::OverlapTooLarge { window: 5, overlap: 5 })
        );
        assert_eq!(
            segment(&messages, 5, 6),
            Err(WindowingError::OverlapTooLarge { window: 5, overlap: 6 })
        );
        assert_eq!(segment(&messages, 0, 0), Err(WindowingError::EmptyWindow));
    }

    #[test]
    fn segmentation_is_deterministic() {
        let messages = history(41);
        assert_eq!(segment(&messages, 12, 3), segment(&messages, 12, 3));
    }

    #[test]
    fn short_and_empty_inputs() {
        let empty: Vec<GenericMessage> = Vec::new();
        assert_eq!(segment(&empty, 12, 3), Ok(Vec::new()));

        let few = history(4);
        let segments = segment(&few, 12, 3).unwrap_or_default();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].items, few);
    }

    #[test]
    fn transcript_joins_sender_lines() {
        let messages = history(2);
        let segments = segment(&messages, 2, 0).unwrap_or_default();
        assert_eq!(segments[0].transcript(), "user1: message 1\nuser2: message 2");
    }
}
