use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// 后台任务的协作式停止信号
///
/// 克隆后共享同一状态。循环在每轮开始检查 `is_stopped`，等待时使用 `sleep`，
/// 停止信号到达时等待立即结束。
#[derive(Clone)]
pub struct StopSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn stop(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow()
    }

    /// 等待指定时长，返回 `true` 表示等待期间收到了停止信号
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stopped() => true,
            _ = tokio::time::sleep(duration) => self.is_stopped(),
        }
    }

    /// 等待停止信号
    pub async fn stopped(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            let stopped = *receiver.borrow_and_update();
            if stopped || receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
