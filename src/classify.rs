//! Outcome classification for probe attempts.
//!
//! Pure and I/O free: a category is derived from the error chain and the
//! response status only. Category names are a closed set that dashboards
//! depend on, so they must not change.

use http::StatusCode;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::io;

const TIMEOUT_NEEDLES: &[&str] = &["timeout", "deadline exceeded", "i/o timeout", "timed out"];
const DNS_NEEDLES: &[&str] = &["no such host", "dns", "name resolution"];
const END_OF_STREAM_NEEDLES: &[&str] = &["eof", "connection closed before message completed"];
const CONNECTION_NEEDLES: &[&str] = &[
    "connection refused",
    "connection reset",
    "broken pipe",
    "network is unreachable",
];

/// Error category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Timeout,
    DnsError,
    ConnectionError,
    /// The status line arrived but the body could not be read.
    ReadError,
    /// A 4xx or 5xx response.
    Http(u16),
    UnknownError,
}

impl Category {
    /// Value of the `error` metric label.
    pub fn as_label(&self) -> Cow<'static, str> {
        match self {
            Category::Timeout => Cow::Borrowed("timeout"),
            Category::DnsError => Cow::Borrowed("dns_error"),
            Category::ConnectionError => Cow::Borrowed("connection_error"),
            Category::ReadError => Cow::Borrowed("read_error"),
            Category::Http(code) => Cow::Owned(format!("http_{code}")),
            Category::UnknownError => Cow::Borrowed("unknown_error"),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_label())
    }
}

/// Result of one probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Error(Category),
}

impl Outcome {
    /// Value of the `status` metric label.
    pub fn status_label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error(_) => "error",
        }
    }

    /// Value of the `error` metric label; empty on success.
    pub fn error_label(&self) -> Cow<'static, str> {
        match self {
            Outcome::Success => Cow::Borrowed(""),
            Outcome::Error(category) => category.as_label(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// How an attempt failed before a status could be judged.
#[derive(Debug, Clone, Copy)]
pub enum Failure<'a> {
    /// Connecting, handshaking or sending failed; no response arrived.
    Transport(&'a (dyn StdError + Send + Sync + 'static)),
    /// The response head arrived but draining the body failed.
    Body(&'a (dyn StdError + Send + Sync + 'static)),
}

/// Classify a completed attempt.
///
/// A transport failure is categorised from its error chain, a body failure is
/// always `read_error`, and otherwise a status of 400 or above is
/// `http_<code>`. Anything else is a success.
pub fn classify(failure: Option<Failure<'_>>, status: Option<StatusCode>) -> Outcome {
    match failure {
        Some(Failure::Transport(err)) => Outcome::Error(classify_error(err)),
        Some(Failure::Body(_)) => Outcome::Error(Category::ReadError),
        None => match status {
            Some(status) if status.as_u16() >= 400 => {
                Outcome::Error(Category::Http(status.as_u16()))
            }
            _ => Outcome::Success,
        },
    }
}

/// Categorise a transport error from its text and error chain. First match wins.
pub fn classify_error(err: &(dyn StdError + 'static)) -> Category {
    match_error(err).unwrap_or(Category::UnknownError)
}

fn match_error(err: &(dyn StdError + 'static)) -> Option<Category> {
    let text = err.to_string().to_lowercase();
    let kind = io_kind(err);

    if contains_any(&text, TIMEOUT_NEEDLES) || is_timeout_marked(err) {
        return Some(Category::Timeout);
    }
    if contains_any(&text, DNS_NEEDLES) {
        return Some(Category::DnsError);
    }
    if is_end_of_stream(err, kind) || contains_any(&text, END_OF_STREAM_NEEDLES) {
        return Some(Category::ConnectionError);
    }
    if contains_any(&text, CONNECTION_NEEDLES) {
        return Some(Category::ConnectionError);
    }
    if let Some(category) = err.source().and_then(match_error) {
        return Some(category);
    }
    if is_transient_network(err, kind) {
        return Some(Category::ConnectionError);
    }
    None
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| text.contains(needle))
}

fn io_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    err.downcast_ref::<io::Error>().map(io::Error::kind)
}

/// The peer closed the stream before a complete message arrived.
fn is_end_of_stream(err: &(dyn StdError + 'static), kind: Option<io::ErrorKind>) -> bool {
    if let Some(err) = err.downcast_ref::<hyper::Error>() {
        return err.is_incomplete_message();
    }
    kind == Some(io::ErrorKind::UnexpectedEof)
}

fn is_timeout_marked(err: &(dyn StdError + 'static)) -> bool {
    if let Some(err) = err.downcast_ref::<reqwest::Error>() {
        return err.is_timeout();
    }
    io_kind(err) == Some(io::ErrorKind::TimedOut)
}

fn is_transient_network(err: &(dyn StdError + 'static), kind: Option<io::ErrorKind>) -> bool {
    if let Some(err) = err.downcast_ref::<reqwest::Error>() {
        return err.is_connect();
    }
    matches!(
        kind,
        Some(
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::AddrNotAvailable
        )
    )
}
