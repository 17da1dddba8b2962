#[cfg(test)]
pub mod mocks {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use scheduler_core::{
        models::{
            ExecutorResponse, IdleBeatParam, JobGroup, JobInfo, JobLog, KillParam, TriggerParam,
        },
        traits::{AlertNotifier, ExecutorClient, ExecutorClientFactory, JobGroupRepository, JobRepository},
        SchedulerError, SchedulerResult,
    };
    use scheduler_infrastructure::InMemoryStore;
    use tokio::sync::watch;

    use crate::trigger_pool::{TriggerHandler, TriggerRequest, TriggerSubmitter};

    /// 记录提交请求的提交器
    #[derive(Default)]
    pub struct RecordingSubmitter {
        requests: Mutex<Vec<TriggerRequest>>,
        reject: bool,
    }

    impl RecordingSubmitter {
        pub fn rejecting() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                reject: true,
            }
        }

        pub fn requests(&self) -> Vec<TriggerRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl TriggerSubmitter for RecordingSubmitter {
        fn submit(&self, request: TriggerRequest) -> SchedulerResult<()> {
            if self.reject {
                return Err(SchedulerError::DispatchRejected {
                    job_id: request.job_id,
                });
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }

    /// 记录执行请求的处理器，可选择阻塞直到放行
    pub struct RecordingHandler {
        requests: Mutex<Vec<TriggerRequest>>,
        rejected: Mutex<Vec<TriggerRequest>>,
        started: AtomicUsize,
        gate: Option<(watch::Sender<bool>, watch::Receiver<bool>)>,
    }

    impl Default for RecordingHandler {
        fn default() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                rejected: Mutex::new(Vec::new()),
                started: AtomicUsize::new(0),
                gate: None,
            }
        }
    }

    impl RecordingHandler {
        pub fn blocking() -> Self {
            Self {
                gate: Some(watch::channel(false)),
                ..Self::default()
            }
        }

        pub fn release(&self) {
            if let Some((sender, _)) = &self.gate {
                sender.send_replace(true);
            }
        }

        pub async fn wait_started(&self, count: usize) {
            while self.started.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        pub fn requests(&self) -> Vec<TriggerRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn rejected(&self) -> Vec<TriggerRequest> {
            self.rejected.lock().unwrap().clone()
        }

        pub async fn wait_rejected(&self, count: usize) {
            while self.rejected.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    #[async_trait]
    impl TriggerHandler for RecordingHandler {
        async fn handle(&self, request: TriggerRequest) -> SchedulerResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some((_, receiver)) = &self.gate {
                let mut receiver = receiver.clone();
                while !*receiver.borrow_and_update() {
                    if receiver.changed().await.is_err() {
                        break;
                    }
                }
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }

        async fn reject(&self, request: &TriggerRequest, _reason: &str) -> SchedulerResult<()> {
            self.rejected.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    /// 模拟执行器的行为
    #[derive(Clone)]
    pub struct MockBehavior {
        pub run: Result<ExecutorResponse, String>,
        pub beat: Result<ExecutorResponse, String>,
        pub idle_beat: Result<ExecutorResponse, String>,
        pub kill: Result<ExecutorResponse, String>,
    }

    impl Default for MockBehavior {
        fn default() -> Self {
            Self {
                run: Ok(ExecutorResponse::success()),
                beat: Ok(ExecutorResponse::success()),
                idle_beat: Ok(ExecutorResponse::success()),
                kill: Ok(ExecutorResponse::success()),
            }
        }
    }

    impl MockBehavior {
        pub fn unreachable() -> Self {
            Self {
                run: Err("connection refused".to_string()),
                beat: Err("connection refused".to_string()),
                idle_beat: Err("connection refused".to_string()),
                kill: Err("connection refused".to_string()),
            }
        }

        pub fn busy() -> Self {
            Self {
                idle_beat: Ok(ExecutorResponse::fail("job thread is running or has trigger queue.")),
                ..Self::default()
            }
        }
    }

    fn respond(result: &Result<ExecutorResponse, String>) -> SchedulerResult<ExecutorResponse> {
        result.clone().map_err(SchedulerError::Network)
    }

    pub struct MockExecutorClient {
        address: String,
        behavior: MockBehavior,
        runs: Arc<Mutex<Vec<(String, TriggerParam)>>>,
        beats: Arc<Mutex<Vec<String>>>,
        kills: Arc<Mutex<Vec<(String, i64)>>>,
    }

    #[async_trait]
    impl ExecutorClient for MockExecutorClient {
        async fn run(&self, param: &TriggerParam) -> SchedulerResult<ExecutorResponse> {
            self.runs
                .lock()
                .unwrap()
                .push((self.address.clone(), param.clone()));
            respond(&self.behavior.run)
        }

        async fn beat(&self) -> SchedulerResult<ExecutorResponse> {
            self.beats.lock().unwrap().push(self.address.clone());
            respond(&self.behavior.beat)
        }

        async fn idle_beat(&self, _param: &IdleBeatParam) -> SchedulerResult<ExecutorResponse> {
            self.beats.lock().unwrap().push(self.address.clone());
            respond(&self.behavior.idle_beat)
        }

        async fn kill(&self, param: &KillParam) -> SchedulerResult<ExecutorResponse> {
            self.kills
                .lock()
                .unwrap()
                .push((self.address.clone(), param.job_id));
            respond(&self.behavior.kill)
        }
    }

    /// 按地址配置行为的执行器客户端工厂，记录所有run调用
    #[derive(Default)]
    pub struct MockClientFactory {
        behaviors: Mutex<HashMap<String, MockBehavior>>,
        runs: Arc<Mutex<Vec<(String, TriggerParam)>>>,
        beats: Arc<Mutex<Vec<String>>>,
        kills: Arc<Mutex<Vec<(String, i64)>>>,
        created: AtomicUsize,
    }

    impl MockClientFactory {
        pub fn with_behavior(self, address: &str, behavior: MockBehavior) -> Self {
            self.behaviors
                .lock()
                .unwrap()
                .insert(address.to_string(), behavior);
            self
        }

        pub fn runs(&self) -> Vec<(String, TriggerParam)> {
            self.runs.lock().unwrap().clone()
        }

        pub fn beats(&self) -> Vec<String> {
            self.beats.lock().unwrap().clone()
        }

        pub fn kills(&self) -> Vec<(String, i64)> {
            self.kills.lock().unwrap().clone()
        }

        pub fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    impl ExecutorClientFactory for MockClientFactory {
        fn create(&self, address: &str, _access_token: Option<&str>) -> Arc<dyn ExecutorClient> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .get(address)
                .cloned()
                .unwrap_or_default();
            Arc::new(MockExecutorClient {
                address: address.to_string(),
                behavior,
                runs: self.runs.clone(),
                beats: self.beats.clone(),
                kills: self.kills.clone(),
            })
        }
    }

    /// 记录告警次数的通知器
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<i64>>,
        fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn sent(&self) -> Vec<i64> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AlertNotifier for RecordingNotifier {
        async fn notify(&self, _job: &JobInfo, log: &JobLog) -> SchedulerResult<()> {
            self.sent.lock().unwrap().push(log.id);
            if self.fail {
                return Err(SchedulerError::Network("smtp unavailable".to_string()));
            }
            Ok(())
        }
    }

    /// 创建手动地址分组和一个任务
    pub async fn seed_job(
        store: &InMemoryStore,
        addresses: &[&str],
        configure: impl FnOnce(&mut JobInfo),
    ) -> (JobGroup, JobInfo) {
        let group = JobGroupRepository::create(
            store,
            &JobGroup::manual(
                "demo-executor",
                addresses.iter().map(|a| a.to_string()).collect(),
            ),
        )
        .await
        .unwrap();
        let mut job = JobInfo::new(group.id, "demoJobHandler");
        configure(&mut job);
        let job = JobRepository::create(store, &job).await.unwrap();
        (group, job)
    }
}
