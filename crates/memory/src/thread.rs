use core::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

use atomic::{Atomic, Ordering};
use defines::error::{errno, KResult};
use event_listener::{listener, Event};
use klocks::SpinMutex;
use smallvec::SmallVec;

use crate::task::{Task, TaskId};

pub type ThreadId = usize;

#[derive(bytemuck::NoUninit, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadStatus {
    Ready,
    Running,
    Blocking,
    Terminated,
}

/// 模拟机器上的线程。
///
/// 线程本身没有执行流，它的"执行"就是调度器上某个持有它的 future。
/// 这里只记录缺页处理关心的状态：是否挂起，以及是否已经被杀死
pub struct Thread {
    tid: ThreadId,
    task_id: TaskId,
    task: Weak<Task>,
    status: Atomic<ThreadStatus>,
    /// 嵌套挂起的层数。缺页时线程先挂在私有的等待令牌上，换入换出时又会再挂起一层
    suspend_depth: AtomicUsize,
}

impl Thread {
    pub(crate) fn new(tid: ThreadId, task_id: TaskId, task: Weak<Task>) -> Self {
        Self {
            tid,
            task_id,
            task,
            status: Atomic::new(ThreadStatus::Ready),
            suspend_depth: AtomicUsize::new(0),
        }
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 线程所属的任务。任务已经被释放时返回 `ESRCH`
    pub fn task(&self) -> KResult<Arc<Task>> {
        self.task.upgrade().ok_or(errno::ESRCH)
    }

    pub fn status(&self) -> ThreadStatus {
        self.status.load(Ordering::Acquire)
    }

    pub fn is_killed(&self) -> bool {
        self.status() == ThreadStatus::Terminated
    }

    /// 杀死线程。线程不会立刻停下，而是在下次从挂起中恢复时自己发现
    pub fn kill(&self) {
        self.status.store(ThreadStatus::Terminated, Ordering::Release);
    }

    /// 挂起线程，可以嵌套
    pub fn block(&self) {
        self.suspend_depth.fetch_add(1, Ordering::AcqRel);
        self.transit(ThreadStatus::Blocking);
    }

    /// 解除一层挂起，最外层解除后线程回到 `Running`
    pub fn unblock(&self) {
        let prev = self
            .suspend_depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                depth.checked_sub(1)
            })
            .unwrap_or(0);
        if prev <= 1 {
            self.transit(ThreadStatus::Running);
        }
    }

    pub fn suspend_depth(&self) -> usize {
        self.suspend_depth.load(Ordering::Acquire)
    }

    /// `Terminated` 是终态，任何转换都不会覆盖它
    fn transit(&self, to: ThreadStatus) {
        let current = self.status();
        if current != ThreadStatus::Terminated {
            let _ = self
                .status
                .compare_exchange(current, to, Ordering::AcqRel, Ordering::Acquire);
        }
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("task_id", &self.task_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// 线程的等待集合。
///
/// 显式记录在上面挂起的线程，唤醒时一次性全部唤醒，不保证顺序
#[derive(Default)]
pub struct WaitSet {
    event: Event,
    waiting: SpinMutex<SmallVec<[Arc<Thread>; 4]>>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂起 `thread` 直到下一次 [`WaitSet::notify_all`]
    pub async fn wait(&self, thread: &Arc<Thread>) {
        // 先建立监听再登记，中间被唤醒也不会丢失
        listener!(self.event => listener);
        self.enqueue(thread);
        listener.await;
    }

    /// 只登记并挂起线程，不等待。用于驱动缺页的线程自己的等待令牌
    pub fn enqueue(&self, thread: &Arc<Thread>) {
        self.waiting.lock().push(Arc::clone(thread));
        thread.block();
    }

    /// 唤醒所有等待者，返回被唤醒的线程数
    pub fn notify_all(&self) -> usize {
        let waiting = core::mem::take(&mut *self.waiting.lock());
        for thread in &waiting {
            thread.unblock();
        }
        self.event.notify(usize::MAX);
        waiting.len()
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Weak};

    use executor::Executor;

    use super::{Thread, ThreadStatus, WaitSet};

    fn orphan(tid: usize) -> Arc<Thread> {
        Arc::new(Thread::new(tid, 0, Weak::new()))
    }

    #[test]
    fn nested_block() {
        let thread = orphan(1);
        thread.block();
        thread.block();
        assert_eq!(thread.status(), ThreadStatus::Blocking);
        thread.unblock();
        assert_eq!(thread.status(), ThreadStatus::Blocking);
        thread.unblock();
        assert_eq!(thread.status(), ThreadStatus::Running);
        assert_eq!(thread.suspend_depth(), 0);
        // 多余的解除不会出错
        thread.unblock();
        assert_eq!(thread.suspend_depth(), 0);
    }

    #[test]
    fn killed_stays_killed() {
        let thread = orphan(1);
        thread.block();
        thread.kill();
        thread.unblock();
        assert!(thread.is_killed());
        thread.block();
        assert_eq!(thread.status(), ThreadStatus::Terminated);
        assert!(thread.task().is_err());
    }

    #[test]
    fn notify_wakes_every_waiter() {
        let executor = Executor::new();
        let set = Arc::new(WaitSet::new());
        let threads = [orphan(1), orphan(2), orphan(3)];
        let tasks: Vec<_> = threads
            .iter()
            .map(|thread| {
                let set = Arc::clone(&set);
                let thread = Arc::clone(thread);
                executor.spawn(async move { set.wait(&thread).await })
            })
            .collect();
        executor.run_until_idle();
        assert_eq!(set.len(), 3);
        assert!(threads.iter().all(|t| t.status() == ThreadStatus::Blocking));

        assert_eq!(set.notify_all(), 3);
        assert!(set.is_empty());
        assert!(threads.iter().all(|t| t.status() == ThreadStatus::Running));
        executor.run_until_idle();
        assert!(tasks.iter().all(|t| t.is_finished()));
    }
}
