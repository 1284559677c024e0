//! Panic containment for handler and session tasks.
//!
//! A panicking handler must not take the session or the server down with it.
//! [`catch_panic`] converts an unwinding future into an error value carrying a
//! printable [`PanicMessage`].

use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;

/// Panic payload that renders as text when logged.
///
/// `String` and `&'static str` payloads are shown verbatim; anything else
/// falls back to `Debug` formatting.
///
/// ```
/// use wirelink::panic::PanicMessage;
/// assert_eq!(PanicMessage::from(Box::new("boom") as Box<_>).to_string(), "boom");
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl From<Box<dyn Any + Send>> for PanicMessage {
    fn from(payload: Box<dyn Any + Send>) -> Self { Self(payload) }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

/// Drive `fut` to completion, turning a panic into `Err(PanicMessage)`.
pub async fn catch_panic<F>(fut: F) -> Result<F::Output, PanicMessage>
where
    F: Future,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(PanicMessage::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn string_panics_are_rendered() {
        let err = catch_panic(async { panic!("handler exploded") })
            .await
            .expect_err("future panics");
        assert_eq!(err.to_string(), "handler exploded");
    }

    #[tokio::test]
    async fn non_string_panics_fall_back_to_debug() {
        let err = catch_panic(async { std::panic::panic_any(5_u32) })
            .await
            .expect_err("future panics");
        assert!(err.to_string().contains("Any"));
    }

    #[tokio::test]
    async fn completed_futures_pass_through() {
        assert_eq!(catch_panic(async { 7 }).await.expect("no panic"), 7);
    }
}
