//! The unit of exchange between two endpoints.
//!
//! A [`Message`] carries a type discriminator used for handler dispatch, an
//! opaque payload, and a set of string headers. The correlation layer reserves
//! [`MESSAGE_ID`] and [`RESPONSE_TO`] for request/reply matching.

use std::{collections::BTreeMap, fmt};

use bincode::{Decode, Encode};

/// Header stamped on a request by the correlation layer.
pub const MESSAGE_ID: &str = "MessageId";

/// Header stamped on a reply, echoing the request's [`MESSAGE_ID`].
pub const RESPONSE_TO: &str = "ResponseTo";

/// A typed message exchanged over a [`Connection`](crate::connection::Connection).
///
/// Headers are kept sorted by key so the encoded form is deterministic.
///
/// # Examples
///
/// ```
/// use wirelink::message::{Message, RESPONSE_TO};
///
/// let reply = Message::new("Response", "done").with_header(RESPONSE_TO, "42");
/// assert_eq!(reply.response_to(), Some("42"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Message {
    message_type: String,
    payload: String,
    headers: BTreeMap<String, String>,
}

impl Message {
    /// Create a message with no headers.
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            message_type: message_type.into(),
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Attach a header, replacing any previous value for `key`.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(key, value);
        self
    }

    /// Discriminator used to route the message to a handler.
    #[must_use]
    pub fn message_type(&self) -> &str { &self.message_type }

    /// Opaque application content.
    #[must_use]
    pub fn payload(&self) -> &str { &self.payload }

    /// All headers in key order.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> { &self.headers }

    /// Look up a single header.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> { self.headers.get(key).map(String::as_str) }

    /// Insert or replace a header, returning the previous value.
    pub fn set_header(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.headers.insert(key.into(), value.into())
    }

    /// Correlation id of a request, if one was stamped.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> { self.header(MESSAGE_ID) }

    /// Correlation id this message replies to, if any.
    #[must_use]
    pub fn response_to(&self) -> Option<&str> { self.header(RESPONSE_TO) }

    /// Returns `true` when the message has a non-blank type and can be routed.
    ///
    /// Unroutable messages are never dispatched, not even to a default
    /// handler.
    #[must_use]
    pub fn is_routable(&self) -> bool { !self.message_type.trim().is_empty() }

    /// Stamp [`RESPONSE_TO`] on `self` from the request's [`MESSAGE_ID`].
    ///
    /// Does nothing when the request carried no id.
    pub fn reply_to(&mut self, request: &Message) {
        if let Some(id) = request.message_id() {
            self.set_header(RESPONSE_TO, id);
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} bytes", self.message_type, self.payload.len())?;
        if let Some(id) = self.message_id() {
            write!(f, ", id={id}")?;
        }
        if let Some(id) = self.response_to() {
            write!(f, ", reply-to={id}")?;
        }
        f.write_str(")")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn reply_to_copies_request_id() {
        let request = Message::new("Text", "hi").with_header(MESSAGE_ID, "abc");
        let mut reply = Message::new("Response", "ok");
        reply.reply_to(&request);
        assert_eq!(reply.response_to(), Some("abc"));
    }

    #[test]
    fn reply_to_without_request_id_leaves_headers_untouched() {
        let request = Message::new("Text", "hi");
        let mut reply = Message::new("Response", "ok");
        reply.reply_to(&request);
        assert!(reply.headers().is_empty());
    }

    #[rstest]
    #[case("Text", true)]
    #[case("", false)]
    #[case("   ", false)]
    fn routable_requires_non_blank_type(#[case] message_type: &str, #[case] expected: bool) {
        assert_eq!(Message::new(message_type, "").is_routable(), expected);
    }

    #[test]
    fn display_includes_correlation_headers() {
        let msg = Message::new("Text", "12345")
            .with_header(MESSAGE_ID, "a")
            .with_header(RESPONSE_TO, "b");
        assert_eq!(msg.to_string(), "Text(5 bytes, id=a, reply-to=b)");
    }
}
