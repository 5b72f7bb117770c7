use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::common::{calculate_backoff, CdsError, Unit, UnitKind, UnitState};
use crate::pilot::{PilotService, PilotState};
use crate::service::core::CdsShared;

/// 分发循环 (Dispatcher)
///
/// 每个 CDS 一个专属异步工作者：从两条进料队列取单元，调 Scheduler
/// 选 Pilot，提交并推进状态。放置失败走全抖动指数退避重入队。
pub(crate) struct Dispatcher {
    shared: Arc<CdsShared>,
}

impl Dispatcher {
    /// 启动分发循环，返回任务句柄
    pub(crate) fn spawn(shared: Arc<CdsShared>) -> JoinHandle<()> {
        let dispatcher = Dispatcher { shared };
        tokio::spawn(async move { dispatcher.run().await })
    }

    async fn run(&self) {
        let id = self.shared.id.clone();
        debug!("[Dispatch-{}] Worker started", id);

        let poll_interval = Duration::from_millis(self.shared.config.dispatch.poll_interval_ms);
        loop {
            if self.shared.stop.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = self.shared.stop.cancelled() => break,
                unit = self.shared.cu_queue.pop() => {
                    self.process(unit, UnitKind::Compute).await;
                }
                unit = self.shared.du_queue.pop() => {
                    self.process(unit, UnitKind::Data).await;
                }
                // 周期性空转，避免在极端情况下错过停机信号
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        debug!("[Dispatch-{}] Worker stopped", id);
    }

    /// 处理一个出队单元：隔离 panic，结算完成计数，发布目录
    async fn process(&self, unit: Unit, kind: UnitKind) {
        let result = AssertUnwindSafe(self.dispatch_unit(&unit)).catch_unwind().await;
        if let Err(payload) = result {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "dispatch panicked".to_string());
            error!(
                "[Dispatch-{}] Panic while dispatching {}: {}",
                self.shared.id,
                unit.id(),
                msg
            );
            unit.fail(msg);
        }
        self.shared.queue_for(kind).task_done();
        self.shared.publish_directory().await;
    }

    /// 单个单元的放置尝试
    async fn dispatch_unit(&self, unit: &Unit) {
        // 取消可能发生在排队期间
        if unit.state().is_terminal() {
            return;
        }

        let pilots: Vec<Arc<dyn PilotService>> =
            self.shared.pilots_for(unit.kind()).read().clone();
        let snapshots: Vec<_> = pilots.iter().map(|p| p.snapshot()).collect();

        let selected = self
            .shared
            .scheduler_for(unit.kind())
            .select(unit.description(), &snapshots)
            .and_then(|idx| pilots.get(idx).cloned());

        let pilot = match selected {
            Some(p) => p,
            None => {
                // 无可用 Pilot 是稳态不是错误，退避后再试
                self.backoff_requeue(unit).await;
                return;
            }
        };

        match pilot.get_state().await {
            Ok(PilotState::Running) => {
                // 推进失败说明单元在排队期间已被取消，不再提交
                if unit.advance(UnitState::Scheduled) {
                    self.submit_to_pilot(unit, pilot).await;
                } else {
                    debug!(
                        "[Dispatch-{}] Unit {} reached terminal state before placement, skipped",
                        self.shared.id,
                        unit.id()
                    );
                }
            }
            Ok(state) => {
                warn!(
                    "[Dispatch-{}] Pilot {} not ready ({:?}), requeueing {}",
                    self.shared.id,
                    pilot.id(),
                    state,
                    unit.id()
                );
                self.backoff_requeue(unit).await;
            }
            Err(e) => {
                warn!(
                    "[Dispatch-{}] Failed to probe pilot {}: {}",
                    self.shared.id,
                    pilot.id(),
                    e
                );
                self.backoff_requeue(unit).await;
            }
        }
    }

    /// 放置失败：计数、退避重入队，或在耗尽后判死
    async fn backoff_requeue(&self, unit: &Unit) {
        let cfg = &self.shared.config.placement;
        let attempt = unit.note_placement_attempt();
        if attempt >= cfg.max_placement_attempts {
            unit.fail(
                CdsError::PlacementExhausted { attempts: attempt }.to_string(),
            );
            return;
        }
        let delay = calculate_backoff(
            attempt,
            cfg.placement_backoff_base_ms,
            cfg.placement_backoff_max_ms,
        );
        debug!(
            "[Dispatch-{}] No placement for {} (attempt {}), retrying in {:?}",
            self.shared.id,
            unit.id(),
            attempt,
            delay
        );
        self.shared.queue_for(unit.kind()).requeue_after(unit.clone(), delay);
    }

    /// 向选中的 Pilot 提交，带有限重试
    async fn submit_to_pilot(&self, unit: &Unit, pilot: Arc<dyn PilotService>) {
        let cfg = &self.shared.config.placement;
        let max_retries = cfg.submit_max_retries.max(1);

        for attempt in 1..=max_retries {
            unit.note_submit_attempt();
            match pilot.submit(unit.description()).await {
                Ok(local_handle) => {
                    unit.assign_pilot(pilot.id().to_string(), local_handle);
                    unit.clear_last_error();
                    unit.advance(UnitState::Running);
                    debug!(
                        "[Dispatch-{}] Unit {} placed on pilot {}",
                        self.shared.id,
                        unit.id(),
                        pilot.id()
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        "[Dispatch-{}] Submit attempt {}/{} for {} on {} failed: {}",
                        self.shared.id,
                        attempt,
                        max_retries,
                        unit.id(),
                        pilot.id(),
                        e
                    );
                    unit.set_last_error(e.to_string());
                    if attempt < max_retries {
                        let delay = calculate_backoff(
                            attempt,
                            cfg.submit_backoff_base_ms,
                            cfg.submit_backoff_max_ms,
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let reason = unit
            .last_error()
            .unwrap_or_else(|| "submission failed".to_string());
        unit.fail(
            CdsError::SubmissionFailed {
                pilot_id: pilot.id().to_string(),
                attempts: max_retries,
                reason,
            }
            .to_string(),
        );
    }
}
