use serde::Serialize;
use std::sync::{Arc, RwLock};
use tscore::interface::StatusRecord;

/// What the HTTP bridge serves: the latest dwell summary, if any.
#[derive(Debug, Clone, Serialize, Default)]
pub struct StatusModel {
    pub latest: Option<StatusRecord>,
    pub records_published: u64,
}

pub type SharedModel = Arc<RwLock<StatusModel>>;

impl StatusModel {
    pub fn shared() -> SharedModel {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn publish(&mut self, record: &StatusRecord) {
        self.latest = Some(record.clone());
        self.records_published += 1;
    }
}
