use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// 进料队列 (Intake Queue)
///
/// 多生产者 / 单消费者，按提交顺序 FIFO 出队。
/// 额外维护一个完成计数：`push` 登记，`task_done` 注销，`join` 阻塞到
/// 所有已登记条目都被处理完。这是 `wait()` 的排空条件来源。
pub(crate) struct IntakeQueue<T> {
    items: Mutex<VecDeque<T>>,
    /// 已登记但尚未 task_done 的条目数
    unfinished: AtomicUsize,
    /// 唤醒消费者 (带 permit，通知不丢失)
    item_notify: Notify,
    /// 唤醒 join 等待者
    join_notify: Notify,
}

impl<T> IntakeQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            unfinished: AtomicUsize::new(0),
            item_notify: Notify::new(),
            join_notify: Notify::new(),
        }
    }

    /// 入队并登记完成计数
    pub(crate) fn push(&self, item: T) {
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        self.items.lock().push_back(item);
        self.item_notify.notify_one();
    }

    /// 仅入队，不再登记 (条目在 `requeue_after` 时已占位)
    fn push_registered(&self, item: T) {
        self.items.lock().push_back(item);
        self.item_notify.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// 阻塞出队 (单消费者)
    ///
    /// 取消安全：条目只在返回前的 `try_pop` 中被移除，future 在任何
    /// await 点被丢弃都不会弄丢条目。
    pub(crate) async fn pop(&self) -> T {
        loop {
            if let Some(v) = self.try_pop() {
                return v;
            }
            let notified = self.item_notify.notified();
            tokio::pin!(notified);
            // notify_one 会存蓄 permit，复查只是缩短唤醒路径
            if let Some(v) = self.try_pop() {
                return v;
            }
            notified.await;
        }
    }

    /// 标记一个已出队条目处理完毕
    pub(crate) fn task_done(&self) {
        let prev = self.unfinished.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "task_done without matching push");
        if prev == 1 {
            self.join_notify.notify_waiters();
        }
    }

    /// 所有已登记条目都处理完了吗
    pub(crate) fn is_drained(&self) -> bool {
        self.unfinished.load(Ordering::SeqCst) == 0
    }

    /// 阻塞直到队列排空 (完成计数归零)
    pub(crate) async fn join(&self) {
        loop {
            if self.is_drained() {
                return;
            }
            let notified = self.join_notify.notified();
            tokio::pin!(notified);
            // notify_waiters 不存蓄 permit，必须先注册再复查
            notified.as_mut().enable();
            if self.is_drained() {
                return;
            }
            notified.await;
        }
    }

    /// 延迟重入队
    ///
    /// 完成计数立即占位，条目在 delay 之后才真正回到队尾；期间
    /// `join` 不会误判排空。用于放置失败后的退避重试。
    pub(crate) fn requeue_after(self: &Arc<Self>, item: T, delay: Duration)
    where
        T: Send + 'static,
    {
        self.unfinished.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.push_registered(item);
        });
    }
}
