//! Frozen test clock: an absolute instant and/or an accumulated offset.

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{FxrError, Result};
use crate::fixture::context::FixtureContext;
use crate::fixture::scope::Fixture;
use crate::fixture::state::FixtureState;
use crate::fixture::tree::{Declaration, NodeInfo};
use crate::logger::journal::JournalEvent;

const NAME: &str = "date_time";

/// Clock shared with code under test. Unfrozen, it follows the wall clock.
#[derive(Debug, Clone, Default)]
pub struct TestClock {
    frozen: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl TestClock {
    pub fn now(&self) -> DateTime<Utc> {
        let frozen = *self.frozen.lock();
        frozen.unwrap_or_else(Utc::now)
    }

    pub fn frozen(&self) -> Option<DateTime<Utc>> {
        *self.frozen.lock()
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.frozen.lock() = Some(instant);
    }

    pub fn reset(&self) {
        *self.frozen.lock() = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DateTimeDeclaration {
    /// RFC 3339 instant.
    pub at: Option<DateTime<Utc>>,
    pub add_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DateTimeState {
    pub at: Option<DateTime<Utc>>,
    pub offset_seconds: Option<i64>,
}

impl FixtureState for DateTimeState {
    fn merge(&mut self, other: &Self) -> Result<()> {
        if other.at.is_some() {
            self.at = other.at;
            self.offset_seconds = None;
        }
        if let Some(add) = other.offset_seconds {
            let total = self.offset_seconds.unwrap_or(0).checked_add(add).ok_or_else(|| {
                FxrError::declaration(NAME, format!("offset overflow adding {add}s"))
            })?;
            self.offset_seconds = Some(total);
        }
        Ok(())
    }
}

impl DateTimeState {
    /// The instant to freeze the clock at, or `None` to release it.
    pub fn resolve(&self) -> Result<Option<DateTime<Utc>>> {
        if self.at.is_none() && self.offset_seconds.is_none() {
            return Ok(None);
        }
        let base = self.at.unwrap_or_else(Utc::now);
        let offset = self.offset_seconds.unwrap_or(0);
        TimeDelta::try_seconds(offset)
            .and_then(|delta| base.checked_add_signed(delta))
            .map(Some)
            .ok_or_else(|| FxrError::declaration(NAME, format!("offset of {offset}s is out of range")))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeFixture;

impl Fixture for DateTimeFixture {
    type Declaration = DateTimeDeclaration;
    type State = DateTimeState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> i32 {
        0
    }

    fn select<'d>(&self, declaration: &'d Declaration) -> Option<&'d DateTimeDeclaration> {
        match declaration {
            Declaration::DateTime(d) => Some(d),
            _ => None,
        }
    }

    fn default_state(&self, _ctx: &mut FixtureContext<'_>) -> Result<DateTimeState> {
        Ok(DateTimeState::default())
    }

    fn convert(
        &self,
        declaration: &DateTimeDeclaration,
        _ctx: &mut FixtureContext<'_>,
    ) -> Result<DateTimeState> {
        Ok(DateTimeState {
            at: declaration.at,
            offset_seconds: declaration.add_seconds,
        })
    }

    fn apply(
        &self,
        _old: &DateTimeState,
        new: &DateTimeState,
        node: &NodeInfo,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        let details = match new.resolve()? {
            Some(instant) => {
                ctx.clock.set(instant);
                format!("clock frozen at {}", instant.to_rfc3339())
            }
            None => {
                ctx.clock.reset();
                "clock released".to_string()
            }
        };
        ctx.record(JournalEvent::FixtureApplied {
            node: node.path.clone(),
            fixture: NAME.to_string(),
            details,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn instant(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn new_instant_resets_accumulated_offset() {
        let mut state = DateTimeState {
            at: Some(instant(8)),
            offset_seconds: Some(60),
        };
        state
            .merge(&DateTimeState {
                at: Some(instant(12)),
                offset_seconds: None,
            })
            .unwrap();
        assert_eq!(state.at, Some(instant(12)));
        assert_eq!(state.offset_seconds, None);
    }

    #[test]
    fn offsets_accumulate() {
        let mut state = DateTimeState {
            at: Some(instant(8)),
            offset_seconds: None,
        };
        for _ in 0..2 {
            state
                .merge(&DateTimeState {
                    at: None,
                    offset_seconds: Some(1800),
                })
                .unwrap();
        }
        assert_eq!(state.resolve().unwrap(), Some(instant(9)));
    }

    #[test]
    fn empty_state_releases_the_clock() {
        assert_eq!(DateTimeState::default().resolve().unwrap(), None);
        let clock = TestClock::default();
        clock.set(instant(3));
        assert_eq!(clock.now(), instant(3));
        clock.reset();
        assert!(clock.frozen().is_none());
    }

    #[test]
    fn declaration_parses_rfc3339() {
        let decl: DateTimeDeclaration =
            serde_json::from_str(r#"{"at": "2024-03-01T08:00:00Z", "add_seconds": 5}"#).unwrap();
        assert_eq!(decl.at, Some(instant(8)));
        assert_eq!(decl.add_seconds, Some(5));
    }
}
