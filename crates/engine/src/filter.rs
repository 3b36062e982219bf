//! Which stream events make it into the visible history.

use claudeport_protocol::{EventKind, StreamEvent, SUBTYPE_RESULT};

/// Applied identically to live events and to events loaded from disk.
///
/// Drops meta events, every System event (init is consumed separately),
/// the `result` subtype, and any wire type named `RESULT`.
pub fn is_displayable(event: &StreamEvent) -> bool {
    if event.is_meta {
        return false;
    }
    if event.kind == EventKind::System {
        return false;
    }
    if event.is_subtype(SUBTYPE_RESULT) || event.raw_type.eq_ignore_ascii_case("result") {
        return false;
    }
    true
}

pub fn retain_displayable(events: Vec<StreamEvent>) -> Vec<StreamEvent> {
    events.into_iter().filter(is_displayable).collect()
}
