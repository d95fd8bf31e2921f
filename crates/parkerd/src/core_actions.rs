//! Built-in actions answered by the daemon itself.
//!
//! `time.get`, `date.get`, and `day.get` never leave the process. Their
//! namespaces are reserved so no plugin can shadow them. Answers use the
//! host's local offset as captured by [`capture_local_offset`], or UTC when
//! it was never captured.

use once_cell::sync::OnceCell;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use parker_protocol::{Command, Namespace};

const TIME_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[hour]:[minute]:[second]");
const DATE_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

/// Namespaces owned by built-in actions.
pub const RESERVED_NAMESPACES: [&str; 3] = ["time", "date", "day"];

static LOCAL_OFFSET: OnceCell<UtcOffset> = OnceCell::new();

/// Source of the current instant.
pub type Clock = fn() -> OffsetDateTime;

/// Records the host's UTC offset for built-in actions.
///
/// The offset can only be read reliably while the process is
/// single-threaded, so call this first thing in `main`. Falls back to UTC
/// when the offset is indeterminate. Later calls return the first value.
pub fn capture_local_offset() -> UtcOffset {
    *LOCAL_OFFSET.get_or_init(|| UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC))
}

/// Answers built-in commands.
#[derive(Debug, Clone, Copy)]
pub struct CoreActions {
    clock: Clock,
    offset: UtcOffset,
}

impl Default for CoreActions {
    fn default() -> Self {
        Self {
            clock: OffsetDateTime::now_utc,
            offset: LOCAL_OFFSET.get().copied().unwrap_or(UtcOffset::UTC),
        }
    }
}

impl CoreActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `clock` instead of the system clock, reporting in UTC.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            clock,
            offset: UtcOffset::UTC,
        }
    }

    /// Reports times at `offset` instead.
    #[must_use]
    pub fn with_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Namespaces reserved for built-in actions.
    pub fn reserved_namespaces() -> impl Iterator<Item = Namespace> {
        RESERVED_NAMESPACES
            .into_iter()
            .filter_map(|name| Namespace::new(name).ok())
    }

    /// Answers `command` when it names a built-in action.
    ///
    /// Returns `None` for anything else so the caller can forward it.
    pub fn answer(&self, command: &Command) -> Option<serde_json::Value> {
        if command.action() != "get" {
            return None;
        }
        let now = (self.clock)().to_offset(self.offset);
        let text = match command.namespace().as_str() {
            "time" => now.format(TIME_FORMAT).ok()?,
            "date" => now.format(DATE_FORMAT).ok()?,
            "day" => now.weekday().to_string(),
            _ => return None,
        };
        Some(serde_json::Value::String(text))
    }
}
