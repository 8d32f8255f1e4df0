use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::local::LocalStore;

pub const DAILY_TARGET_KEY: &str = "daily_target";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTarget {
    pub date: Option<NaiveDate>,
    pub target: u32,
}

/// Locally cached daily target, bumped optimistically between recomputes.
#[derive(Debug, Clone, Default)]
pub struct DailyTargetCache {
    value: DailyTarget,
    store: Option<LocalStore>,
}

impl DailyTargetCache {
    pub fn load(store: LocalStore, today: NaiveDate) -> Result<Self> {
        let value: DailyTarget = store.read(DAILY_TARGET_KEY)?;
        let mut cache = Self {
            value,
            store: Some(store),
        };
        cache.roll_over(today)?;
        Ok(cache)
    }

    pub fn in_memory(today: NaiveDate) -> Self {
        Self {
            value: DailyTarget {
                date: Some(today),
                target: 0,
            },
            store: None,
        }
    }

    pub fn target(&self, today: NaiveDate) -> u32 {
        if self.value.date == Some(today) {
            self.value.target
        } else {
            0
        }
    }

    pub fn increment(&mut self, today: NaiveDate) -> Result<u32> {
        self.roll_over(today)?;
        self.value.target = self.value.target.saturating_add(1);
        self.persist()?;
        Ok(self.value.target)
    }

    pub fn decrement(&mut self, today: NaiveDate) -> Result<u32> {
        self.roll_over(today)?;
        self.value.target = self.value.target.saturating_sub(1);
        self.persist()?;
        Ok(self.value.target)
    }

    /// Replace the cached value with a full recompute.
    pub fn set(&mut self, today: NaiveDate, target: u32) -> Result<()> {
        if self.value == (DailyTarget { date: Some(today), target }) {
            return Ok(());
        }
        self.value = DailyTarget {
            date: Some(today),
            target,
        };
        self.persist()
    }

    fn roll_over(&mut self, today: NaiveDate) -> Result<()> {
        if self.value.date == Some(today) {
            return Ok(());
        }
        tracing::debug!(%today, "daily target reset for new day");
        self.value = DailyTarget {
            date: Some(today),
            target: 0,
        };
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.write(DAILY_TARGET_KEY, &self.value),
            None => Ok(()),
        }
    }
}
