//! 端到端编排场景
//!
//! 用内存协调目录和 Mock Pilot 验证提交 -> 放置 -> 终态的完整链路。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use talaria::common::{CdsConfig, CdsError, ServiceState, UnitDescription, UnitState};
use talaria::coordination::MemoryCoordination;
use talaria::pilot::{PilotService, PilotState};
use talaria::service::CdsBuilder;

// ==========================================
// 测试辅助
// ==========================================

/// 可注入故障的 Mock Pilot
struct MockPilot {
    id: String,
    url: String,
    state: Mutex<PilotState>,
    /// 前 N 次提交强制失败
    fail_remaining: AtomicU32,
    /// 收到的提交 (记录 executable 属性)
    submissions: Mutex<Vec<String>>,
}

impl MockPilot {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            url: format!("mock://{id}"),
            state: Mutex::new(PilotState::Running),
            fail_remaining: AtomicU32::new(0),
            submissions: Mutex::new(Vec::new()),
        })
    }

    fn failing_first(id: &str, failures: u32) -> Arc<Self> {
        let pilot = Self::new(id);
        pilot.fail_remaining.store(failures, Ordering::SeqCst);
        pilot
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[async_trait]
impl PilotService for MockPilot {
    fn id(&self) -> &str {
        &self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn submit(&self, description: &UnitDescription) -> anyhow::Result<String> {
        let executable = description.executable().unwrap_or("<none>").to_string();
        self.submissions.lock().push(executable);
        if self.fail_remaining.load(Ordering::SeqCst) > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("agent temporarily unavailable");
        }
        Ok(format!("local-{}", self.submissions.lock().len()))
    }

    async fn get_state(&self) -> anyhow::Result<PilotState> {
        Ok(*self.state.lock())
    }
}

fn desc(executable: &str) -> UnitDescription {
    UnitDescription::new().set("executable", executable)
}

/// 轮询等待条件成立 (上限 5 秒)
async fn wait_until<F: Fn() -> bool>(cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

/// 按 RUST_LOG 初始化日志 (重复调用安全)
fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn test_cds() -> talaria::service::ComputeDataService {
    init_logs();
    CdsBuilder::new()
        .application_id("test-app")
        .config(CdsConfig::new_test())
        .build()
        .await
        .unwrap()
}

// ==========================================
// 场景
// ==========================================

#[tokio::test]
async fn round_robin_spreads_units_and_wait_drains() {
    let cds = test_cds().await;
    let pilots = [MockPilot::new("p0"), MockPilot::new("p1"), MockPilot::new("p2")];
    for p in &pilots {
        cds.add_pilot_compute_service(p.clone()).await;
    }

    let mut units = Vec::new();
    for i in 0..10 {
        units.push(
            cds.submit_compute_unit(desc(&format!("/bin/task-{i}")))
                .await
                .unwrap(),
        );
    }

    // 全部放置到 Running
    wait_until(|| units.iter().all(|u| u.state() == UnitState::Running)).await;

    // 轮转上界: ⌈10/3⌉ = 4
    let total: usize = pilots.iter().map(|p| p.submission_count()).sum();
    assert_eq!(total, 10);
    for p in &pilots {
        assert!(p.submission_count() <= 4, "{} got {}", p.id, p.submission_count());
    }

    // Pilot 回报完成后 wait() 返回
    let reporter = units.clone();
    let (wait_result, _) = tokio::join!(cds.wait(), async move {
        for u in &reporter {
            u.report_state(UnitState::Done);
        }
    });
    wait_result.unwrap();
    assert!(units.iter().all(|u| u.state() == UnitState::Done));
}

#[tokio::test]
async fn units_submitted_before_any_pilot_get_placed_later() {
    let cds = test_cds().await;

    let mut units = Vec::new();
    for i in 0..3 {
        units.push(cds.submit_compute_unit(desc(&format!("/bin/t{i}"))).await.unwrap());
    }

    // 没有 Pilot 时单元停在 New，不报错
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(units.iter().all(|u| u.state() == UnitState::New));

    let pilot = MockPilot::new("late");
    cds.add_pilot_compute_service(pilot.clone()).await;

    wait_until(|| units.iter().all(|u| u.state() == UnitState::Running)).await;
    // 每个单元恰好提交一次
    assert_eq!(pilot.submission_count(), 3);
    for u in &units {
        assert_eq!(u.pilot_id().as_deref(), Some("late"));
        assert!(u.local_handle().is_some());
    }
}

#[tokio::test]
async fn transient_submit_failures_are_retried() {
    let cds = test_cds().await;
    let pilot = MockPilot::failing_first("flaky", 2);
    cds.add_pilot_compute_service(pilot.clone()).await;

    let unit = cds.submit_compute_unit(desc("/bin/retry-me")).await.unwrap();
    wait_until(|| unit.state() == UnitState::Running).await;

    // 失败 2 次 + 成功 1 次
    assert_eq!(pilot.submission_count(), 3);
    assert_eq!(unit.submit_attempts(), 3);
    // 成功后临时错误被清掉
    assert_eq!(unit.last_error(), None);
}

#[tokio::test]
async fn exhausted_submissions_fail_the_unit() {
    let cds = test_cds().await;
    // 默认 submit_max_retries = 3，故障次数设置得更多
    let pilot = MockPilot::failing_first("broken", 100);
    cds.add_pilot_compute_service(pilot.clone()).await;

    let unit = cds.submit_compute_unit(desc("/bin/doomed")).await.unwrap();
    wait_until(|| unit.state() == UnitState::Failed).await;

    assert_eq!(pilot.submission_count(), 3);
    let reason = unit.last_error().unwrap();
    assert!(reason.contains("failed after"), "reason = {reason}");
    assert!(reason.contains("broken"), "reason = {reason}");
}

#[tokio::test]
async fn exhausted_placement_fails_the_unit() {
    let mut config = CdsConfig::new_test();
    config.placement.max_placement_attempts = 3;
    let cds = CdsBuilder::new()
        .config(config)
        .build()
        .await
        .unwrap();

    // 不注册任何 Pilot
    let unit = cds.submit_compute_unit(desc("/bin/nowhere")).await.unwrap();
    wait_until(|| unit.state() == UnitState::Failed).await;

    assert_eq!(unit.placement_attempts(), 3);
    let reason = unit.last_error().unwrap();
    assert!(reason.contains("No suitable pilot"), "reason = {reason}");
}

#[tokio::test]
async fn pilot_registry_dedupes_and_removes() {
    let cds = test_cds().await;
    let pilot = MockPilot::new("p0");

    cds.add_pilot_compute_service(pilot.clone()).await;
    cds.add_pilot_compute_service(pilot.clone()).await;
    assert_eq!(cds.list_pilot_compute().len(), 1);

    cds.add_pilot_compute_service(MockPilot::new("p1")).await;
    assert_eq!(cds.list_pilot_compute().len(), 2);

    cds.remove_pilot_compute_service("p0").await;
    let remaining = cds.list_pilot_compute();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "p1");

    // 摘除不存在的 id 是 no-op
    cds.remove_pilot_compute_service("ghost").await;
    assert_eq!(cds.list_pilot_compute().len(), 1);
}

#[tokio::test]
async fn data_units_flow_through_their_own_path() {
    let cds = test_cds().await;
    let du_pilot = MockPilot::new("data-agent");
    cds.add_pilot_data_service(du_pilot.clone()).await;

    let du = cds.submit_data_unit(desc("/data/stage-in")).await.unwrap();
    wait_until(|| du.state() == UnitState::Running).await;

    assert_eq!(du_pilot.submission_count(), 1);
    assert_eq!(du.pilot_id().as_deref(), Some("data-agent"));

    // 查询接口按 id 找得到
    let found = cds.get_data_unit(du.id()).unwrap();
    assert_eq!(found.id(), du.id());
    assert_eq!(cds.list_data_units().len(), 1);
    assert_eq!(cds.list_compute_units().len(), 0);

    // 计算侧的表里查不到数据单元
    assert!(matches!(
        cds.get_compute_unit(du.id()),
        Err(CdsError::UnitNotFound(_))
    ));
}

#[tokio::test]
async fn cancel_is_idempotent_and_rejects_new_submissions() {
    let backend = Arc::new(MemoryCoordination::new("talaria"));
    let cds = CdsBuilder::new()
        .config(CdsConfig::new_test())
        .coordination(backend.clone())
        .build()
        .await
        .unwrap();
    assert_eq!(backend.len(), 1);

    let unit = cds.submit_compute_unit(desc("/bin/orphan")).await.unwrap();

    cds.cancel();
    cds.cancel();
    assert_eq!(cds.get_state(), ServiceState::Canceled);
    // 取消的是服务，不是单元：在队单元保持原状
    assert_eq!(unit.state(), UnitState::New);

    let err = cds.submit_compute_unit(desc("/bin/too-late")).await.unwrap_err();
    assert!(matches!(err, CdsError::ServiceCanceled(_)));
    // 被拒绝的提交不留注册表残渣
    assert_eq!(cds.list_compute_units().len(), 1);

    // 目录条目被异步清理
    wait_until(|| backend.is_empty()).await;
}

#[tokio::test]
async fn reattach_recovers_the_same_identity() {
    let backend = Arc::new(MemoryCoordination::new("talaria"));
    let first = CdsBuilder::new()
        .application_id("app")
        .config(CdsConfig::new_test())
        .coordination(backend.clone())
        .build()
        .await
        .unwrap();
    let id = first.get_id().to_string();
    let url = first.url().to_string();

    // 不 cancel，模拟进程直接消失
    std::mem::forget(first);

    let second = CdsBuilder::new()
        .application_id("app")
        .config(CdsConfig::new_test())
        .coordination(backend)
        .reattach(&url)
        .await
        .unwrap();
    assert_eq!(second.get_id(), id);
    assert_eq!(second.url(), url);
    assert_eq!(second.get_state(), ServiceState::Running);
}

#[tokio::test]
async fn empty_description_is_rejected() {
    let cds = test_cds().await;
    let err = cds
        .submit_compute_unit(UnitDescription::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CdsError::InvalidDescription(_)));
    assert!(cds.list_compute_units().is_empty());
}

#[tokio::test]
async fn shutdown_terminates_the_dispatch_worker() {
    let cds = test_cds().await;
    cds.add_pilot_compute_service(MockPilot::new("p0")).await;
    let unit = cds.submit_compute_unit(desc("/bin/short")).await.unwrap();
    wait_until(|| unit.state() == UnitState::Running).await;

    tokio::time::timeout(Duration::from_secs(5), cds.shutdown())
        .await
        .expect("shutdown did not terminate the worker");
    // 停机只回收循环，已放置的单元不被改写
    assert_eq!(unit.state(), UnitState::Running);
}

#[tokio::test]
async fn cancel_leaves_in_flight_units_untouched() {
    let cds = test_cds().await;
    cds.add_pilot_compute_service(MockPilot::new("p0")).await;

    let unit = cds.submit_compute_unit(desc("/bin/long-runner")).await.unwrap();
    wait_until(|| unit.state() == UnitState::Running).await;

    cds.cancel();
    assert_eq!(cds.get_state(), ServiceState::Canceled);

    // 已交给 Pilot 的单元保持 Running；回报通道也不受影响
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(unit.state(), UnitState::Running);
    assert!(unit.report_state(UnitState::Done));
    assert_eq!(unit.state(), UnitState::Done);
}

#[tokio::test]
async fn canceled_unit_is_never_submitted() {
    let cds = test_cds().await;

    // 没有 Pilot，单元停在队列里退避
    let unit = cds.submit_compute_unit(desc("/bin/never")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(unit.cancel());

    let pilot = MockPilot::new("late");
    cds.add_pilot_compute_service(pilot.clone()).await;

    // Pilot 就位后被取消的单元也不会被投递
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(pilot.submission_count(), 0);
    assert_eq!(unit.state(), UnitState::Canceled);
}

#[tokio::test]
async fn mixed_traffic_keeps_per_kind_round_robin_bound() {
    let cds = test_cds().await;
    let cu_pilots = [MockPilot::new("c0"), MockPilot::new("c1"), MockPilot::new("c2")];
    for p in &cu_pilots {
        cds.add_pilot_compute_service(p.clone()).await;
    }
    cds.add_pilot_data_service(MockPilot::new("d0")).await;

    // 交错提交计算与数据单元
    let mut units: Vec<talaria::common::Unit> = Vec::new();
    for i in 0..6 {
        let cu = cds.submit_compute_unit(desc(&format!("/bin/c{i}"))).await.unwrap();
        units.push((*cu).clone());
        let du = cds.submit_data_unit(desc(&format!("/data/d{i}"))).await.unwrap();
        units.push((*du).clone());
    }
    wait_until(|| units.iter().all(|u| u.state() == UnitState::Running)).await;

    // 数据流量不得扰动计算侧的轮转游标: 6 单元 / 3 Pilot 恰好各 2
    for p in &cu_pilots {
        assert_eq!(p.submission_count(), 2, "{} got {}", p.id, p.submission_count());
    }
}

#[tokio::test]
async fn pending_pilot_is_skipped_until_running() {
    let cds = test_cds().await;
    let pilot = MockPilot::new("warming-up");
    *pilot.state.lock() = PilotState::Pending;
    cds.add_pilot_compute_service(pilot.clone()).await;

    let unit = cds.submit_compute_unit(desc("/bin/wait-for-it")).await.unwrap();

    // Pending 期间不提交
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pilot.submission_count(), 0);
    assert_ne!(unit.state(), UnitState::Running);

    *pilot.state.lock() = PilotState::Running;
    wait_until(|| unit.state() == UnitState::Running).await;
    assert_eq!(pilot.submission_count(), 1);
}
