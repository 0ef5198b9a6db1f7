//! Multipart framing for [`Tag`]-prefixed messages.
//!
//! A DEALER-side message is `[tag, part...]`. A ROUTER-side message carries
//! the sender's identity as frame zero, supplied by ZMQ itself on receive and
//! required on send: `[identity, tag, part...]`. These helpers build and
//! parse both shapes so endpoint code never hand-rolls `VecDeque` plumbing.

use crate::{FrameError, Tag};
use tmq::Multipart;
use zmq::Message;

/// Build a DEALER-side request/reply: `[tag, parts...]`.
pub fn build_multipart(tag: Tag, parts: impl IntoIterator<Item = Vec<u8>>) -> Multipart {
    let mut multipart: Multipart = vec![Message::from(tag.as_bytes())].into();
    for part in parts {
        multipart.push_back(Message::from(part));
    }
    multipart
}

/// Parse a DEALER-side message into its tag and remaining parts.
pub fn parse_multipart(message: &Multipart) -> Result<(Tag, Vec<Vec<u8>>), FrameError> {
    let mut iter = message.iter();
    let tag_frame = iter.next().ok_or(FrameError::Empty)?;
    let tag = Tag::from_bytes(tag_frame).ok_or_else(|| FrameError::UnknownTag(tag_frame.to_vec()))?;
    let parts = iter.map(|frame| frame.to_vec()).collect();
    Ok((tag, parts))
}

/// Build a ROUTER-side reply addressed back to `identity`: `[identity, tag, parts...]`.
pub fn build_routed_multipart(
    identity: &[u8],
    tag: Tag,
    parts: impl IntoIterator<Item = Vec<u8>>,
) -> Multipart {
    let mut multipart: Multipart = vec![Message::from(identity), Message::from(tag.as_bytes())].into();
    for part in parts {
        multipart.push_back(Message::from(part));
    }
    multipart
}

/// Parse a ROUTER-side message into the sender's identity, its tag, and the
/// remaining parts.
pub fn parse_routed_multipart(
    message: &Multipart,
) -> Result<(Vec<u8>, Tag, Vec<Vec<u8>>), FrameError> {
    let mut iter = message.iter();
    let identity = iter.next().ok_or(FrameError::Empty)?.to_vec();
    let tag_frame = iter.next().ok_or(FrameError::Empty)?;
    let tag = Tag::from_bytes(tag_frame).ok_or_else(|| FrameError::UnknownTag(tag_frame.to_vec()))?;
    let parts = iter.map(|frame| frame.to_vec()).collect();
    Ok((identity, tag, parts))
}
