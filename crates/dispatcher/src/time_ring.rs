use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use scheduler_core::models::TriggerType;
use scheduler_infrastructure::MetricsCollector;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::lifecycle::StopSignal;
use crate::trigger_pool::{TriggerRequest, TriggerSubmitter};

const RING_SLOTS: usize = 60;

/// 秒级时间轮
///
/// 60个槽位对应一分钟内的每一秒，槽位内保存需要在该秒触发的任务ID。
/// 调度扫描线程写入，时间轮消费线程每秒取出。
pub struct TimeRing {
    slots: Mutex<Vec<Vec<i64>>>,
}

impl TimeRing {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![Vec::new(); RING_SLOTS]),
        }
    }

    /// 将任务放入 `second` 对应的槽位
    pub async fn push(&self, second: u32, job_id: i64) {
        let slot = second as usize % RING_SLOTS;
        let mut slots = self.slots.lock().await;
        slots[slot].push(job_id);
        debug!("时间轮放入任务: 秒 {}，任务 {}", slot, job_id);
    }

    /// 取出并清空 `second` 对应的槽位
    pub async fn take(&self, second: u32) -> Vec<i64> {
        let slot = second as usize % RING_SLOTS;
        std::mem::take(&mut self.slots.lock().await[slot])
    }

    /// 时间轮中待触发的任务总数
    pub async fn len(&self) -> usize {
        self.slots.lock().await.iter().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TimeRing {
    fn default() -> Self {
        Self::new()
    }
}

/// 时间轮消费者
///
/// 每秒取出当前秒与上一秒两个槽位，上一秒的槽位用于兜住扫描线程
/// 写入晚于消费的情况。
pub struct TimeRingConsumer {
    ring: Arc<TimeRing>,
    submitter: Arc<dyn TriggerSubmitter>,
    metrics: Arc<MetricsCollector>,
}

impl TimeRingConsumer {
    pub fn new(
        ring: Arc<TimeRing>,
        submitter: Arc<dyn TriggerSubmitter>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            ring,
            submitter,
            metrics,
        }
    }

    /// 消费 `now` 所在秒及上一秒的槽位，返回提交的任务ID
    pub async fn consume(&self, now: DateTime<Utc>) -> Vec<i64> {
        let second = now.second();
        let mut job_ids = self.ring.take(second).await;
        job_ids.extend(self.ring.take((second + RING_SLOTS as u32 - 1) % RING_SLOTS as u32).await);

        for job_id in &job_ids {
            let request = TriggerRequest::new(*job_id, TriggerType::Cron);
            if let Err(e) = self.submitter.submit(request) {
                warn!("时间轮任务 {} 提交触发失败: {}", job_id, e);
            }
        }

        if !job_ids.is_empty() {
            debug!("时间轮第 {} 秒触发任务: {:?}", second, job_ids);
        }
        self.metrics.update_time_ring_size(self.ring.len().await as f64);
        job_ids
    }

    /// 消费循环，按整秒对齐
    pub async fn run(&self, stop: StopSignal) {
        info!("时间轮消费线程启动");
        loop {
            if stop.sleep(duration_to_next_second(Utc::now())).await {
                break;
            }
            self.consume(Utc::now()).await;
        }
        info!("时间轮消费线程停止");
    }
}

/// 距离下一个整秒的时长
pub(crate) fn duration_to_next_second(now: DateTime<Utc>) -> Duration {
    let millis = now.timestamp_subsec_millis().min(999);
    Duration::from_millis(1000 - millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::RecordingSubmitter;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_push_and_take_slot() {
        let ring = TimeRing::new();
        ring.push(5, 1).await;
        ring.push(65, 2).await;
        ring.push(6, 3).await;
        assert_eq!(ring.len().await, 3);

        assert_eq!(ring.take(5).await, vec![1, 2]);
        assert!(ring.take(5).await.is_empty());
        assert_eq!(ring.len().await, 1);
    }

    #[tokio::test]
    async fn test_consume_drains_current_and_previous_second() {
        let ring = Arc::new(TimeRing::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let consumer = TimeRingConsumer::new(
            ring.clone(),
            submitter.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
        );

        ring.push(10, 1).await;
        ring.push(9, 2).await;
        ring.push(11, 3).await;

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let mut fired = consumer.consume(now).await;
        fired.sort();
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(ring.len().await, 1);

        let requests = submitter.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests
            .iter()
            .all(|r| r.trigger_type == TriggerType::Cron && r.fail_retry_count.is_none()));
    }

    #[tokio::test]
    async fn test_slot_missed_by_one_cycle_is_still_consumed() {
        let ring = Arc::new(TimeRing::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let consumer = TimeRingConsumer::new(
            ring.clone(),
            submitter.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
        );

        // 第59秒写入，消费者在下一分钟第0秒才运行
        ring.push(59, 7).await;
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(consumer.consume(now).await, vec![7]);
        assert!(ring.is_empty().await);
    }

    #[test]
    fn test_duration_to_next_second() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_250).unwrap();
        assert_eq!(duration_to_next_second(now), Duration::from_millis(750));
    }
}
