use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 按天汇总的调度报表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogReport {
    pub trigger_day: NaiveDate,
    pub running_count: i64,
    pub suc_count: i64,
    pub fail_count: i64,
}

impl LogReport {
    pub fn empty(trigger_day: NaiveDate) -> Self {
        Self {
            trigger_day,
            running_count: 0,
            suc_count: 0,
            fail_count: 0,
        }
    }

    pub fn total(&self) -> i64 {
        self.running_count + self.suc_count + self.fail_count
    }
}
