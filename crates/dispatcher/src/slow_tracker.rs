use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

const WINDOW_BUCKETS: usize = 60;

/// 单个任务的慢触发计数窗口，按时间分桶循环复用
struct SlowWindow {
    /// (桶序号, 计数)，桶序号为 时间戳 / 桶宽
    buckets: [(i64, u32); WINDOW_BUCKETS],
}

impl SlowWindow {
    fn new() -> Self {
        Self {
            buckets: [(i64::MIN, 0); WINDOW_BUCKETS],
        }
    }

    fn record(&mut self, bucket: i64) {
        let slot = &mut self.buckets[bucket.rem_euclid(WINDOW_BUCKETS as i64) as usize];
        if slot.0 != bucket {
            *slot = (bucket, 0);
        }
        slot.1 += 1;
    }

    fn count(&self, current_bucket: i64) -> u32 {
        let oldest = current_bucket - WINDOW_BUCKETS as i64;
        self.buckets
            .iter()
            .filter(|(bucket, _)| *bucket > oldest && *bucket <= current_bucket)
            .map(|(_, count)| count)
            .sum()
    }
}

#[derive(Default)]
struct TrackerState {
    index: HashMap<i64, usize>,
    arena: Vec<SlowWindow>,
    free: Vec<usize>,
}

/// 慢触发统计
///
/// 单次触发耗时超过阈值记为一次慢触发，滑动窗口内慢触发次数超过上限的任务
/// 走慢速线程池，窗口滑过后自动恢复。窗口存放在按任务ID索引的数组中，
/// 过期窗口的槽位回收复用。
pub struct SlowTriggerTracker {
    threshold: Duration,
    max_count: u32,
    bucket_width_seconds: i64,
    state: Mutex<TrackerState>,
}

impl SlowTriggerTracker {
    pub fn new(threshold: Duration, max_count: u32, window: Duration) -> Self {
        let window_seconds = window.as_secs().max(1) as i64;
        let bucket_width_seconds = (window_seconds + WINDOW_BUCKETS as i64 - 1) / WINDOW_BUCKETS as i64;
        Self {
            threshold,
            max_count,
            bucket_width_seconds,
            state: Mutex::new(TrackerState::default()),
        }
    }

    fn bucket_of(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.bucket_width_seconds)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 记录一次触发耗时，返回本次是否计为慢触发
    pub fn record(&self, job_id: i64, elapsed: Duration, now: DateTime<Utc>) -> bool {
        if elapsed <= self.threshold {
            return false;
        }

        let bucket = self.bucket_of(now);
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let slot = match state.index.get(&job_id).copied() {
            Some(slot) => slot,
            None => {
                let slot = match state.free.pop() {
                    Some(slot) => {
                        state.arena[slot] = SlowWindow::new();
                        slot
                    }
                    None => {
                        state.arena.push(SlowWindow::new());
                        state.arena.len() - 1
                    }
                };
                state.index.insert(job_id, slot);
                slot
            }
        };
        state.arena[slot].record(bucket);
        true
    }

    /// 任务是否应走慢速线程池
    pub fn is_slow(&self, job_id: i64, now: DateTime<Utc>) -> bool {
        let bucket = self.bucket_of(now);
        let state = self.lock_state();
        state
            .index
            .get(&job_id)
            .map(|slot| state.arena[*slot].count(bucket) > self.max_count)
            .unwrap_or(false)
    }

    /// 回收窗口内已无慢触发记录的槽位，返回回收数量
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let bucket = self.bucket_of(now);
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let expired: Vec<(i64, usize)> = state
            .index
            .iter()
            .filter(|(_, slot)| state.arena[**slot].count(bucket) == 0)
            .map(|(job_id, slot)| (*job_id, *slot))
            .collect();

        for (job_id, slot) in &expired {
            state.index.remove(job_id);
            state.free.push(*slot);
        }
        if !expired.is_empty() {
            info!("回收 {} 个过期的慢触发统计窗口", expired.len());
        }
        expired.len()
    }

    /// 当前被跟踪的任务数
    pub fn tracked_jobs(&self) -> usize {
        self.lock_state().index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tracker() -> SlowTriggerTracker {
        SlowTriggerTracker::new(Duration::from_millis(500), 10, Duration::from_secs(60))
    }

    #[test]
    fn test_fast_triggers_are_not_counted() {
        let tracker = tracker();
        let now = Utc::now();
        for _ in 0..20 {
            assert!(!tracker.record(1, Duration::from_millis(100), now));
        }
        assert!(!tracker.is_slow(1, now));
        assert_eq!(tracker.tracked_jobs(), 0);
    }

    #[test]
    fn test_job_becomes_slow_after_exceeding_limit() {
        let tracker = tracker();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..10 {
            tracker.record(1, Duration::from_millis(600), now + chrono::Duration::seconds(i));
        }
        assert!(!tracker.is_slow(1, now + chrono::Duration::seconds(10)));

        tracker.record(1, Duration::from_millis(600), now + chrono::Duration::seconds(10));
        assert!(tracker.is_slow(1, now + chrono::Duration::seconds(10)));
        assert!(!tracker.is_slow(2, now));
    }

    #[test]
    fn test_job_reverts_after_window_passes() {
        let tracker = tracker();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for _ in 0..11 {
            tracker.record(1, Duration::from_secs(1), now);
        }
        assert!(tracker.is_slow(1, now + chrono::Duration::seconds(59)));
        assert!(!tracker.is_slow(1, now + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_prune_recycles_slots() {
        let tracker = tracker();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        tracker.record(1, Duration::from_secs(1), now);
        tracker.record(2, Duration::from_secs(1), now + chrono::Duration::seconds(50));

        assert_eq!(tracker.prune(now + chrono::Duration::seconds(70)), 1);
        assert_eq!(tracker.tracked_jobs(), 1);

        // 新任务复用回收的槽位，且不继承旧计数
        tracker.record(3, Duration::from_secs(1), now + chrono::Duration::seconds(70));
        assert!(!tracker.is_slow(3, now + chrono::Duration::seconds(70)));
        assert_eq!(tracker.lock_state().arena.len(), 2);
    }
}
