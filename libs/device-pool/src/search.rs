//! Device search predicates.
//!
//! Predicates are small expression trees over [`DeviceRecord`]: field
//! equality tests combined with `and` / `or`. They hold no state, can be
//! reused across listings, and deserialize from config, e.g.
//!
//! ```yaml
//! or:
//!   - device_id: stb-1
//!   - and: [{ make: X }, { model: "1" }]
//! ```

use serde::{Deserialize, Serialize};

use crate::models::DeviceRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Rack-reported device make.
    Make(String),
    /// Device model.
    Model(String),
    /// Metadata display name.
    Name(String),
    /// Device identifier within the org.
    DeviceId(String),
    /// True if every member is true; an empty `and` is true.
    And(Vec<Predicate>),
    /// True if any member is true; an empty `or` is false.
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, record: &DeviceRecord) -> bool {
        match self {
            Predicate::Make(make) => record.rack.device_make == *make,
            Predicate::Model(model) => record.device.device_model == *model,
            Predicate::Name(name) => record.metadata.name == *name,
            Predicate::DeviceId(id) => record.reference.device == *id,
            Predicate::And(preds) => preds.iter().all(|p| p.matches(record)),
            Predicate::Or(preds) => preds.iter().any(|p| p.matches(record)),
        }
    }

    /// Records from `records` that match, in their original order.
    pub fn filter<'a, I>(&self, records: I) -> Vec<&'a DeviceRecord>
    where
        I: IntoIterator<Item = &'a DeviceRecord>,
    {
        records.into_iter().filter(|r| self.matches(r)).collect()
    }
}

pub fn make(make: impl Into<String>) -> Predicate {
    Predicate::Make(make.into())
}

pub fn model(model: impl Into<String>) -> Predicate {
    Predicate::Model(model.into())
}

pub fn name(name: impl Into<String>) -> Predicate {
    Predicate::Name(name.into())
}

pub fn device_id(id: impl Into<String>) -> Predicate {
    Predicate::DeviceId(id.into())
}

pub fn and(preds: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::And(preds.into_iter().collect())
}

pub fn or(preds: impl IntoIterator<Item = Predicate>) -> Predicate {
    Predicate::Or(preds.into_iter().collect())
}
