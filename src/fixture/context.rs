//! Borrowed collaborators handed to fixture kinds while they convert and apply.

#![allow(missing_docs)]

use crate::core::config::Config;
use crate::kinds::date_time::TestClock;
use crate::logger::journal::{JournalEvent, JournalHandle};
use crate::storage::{CallbackRegistry, DataStorages};

pub struct FixtureContext<'a> {
    pub config: &'a Config,
    pub storages: &'a mut DataStorages,
    pub callbacks: &'a CallbackRegistry,
    pub clock: &'a TestClock,
    pub journal: &'a JournalHandle,
}

impl FixtureContext<'_> {
    pub fn record(&self, event: JournalEvent) {
        self.journal.send(event);
    }
}
