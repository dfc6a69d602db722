//! 模拟机器唯一的 CPU 上的协作式调度器。
//!
//! 每个模拟线程都是一个 future。线程在缺页、换入换出、等待页面时挂起（返回 `Pending`），
//! 由外部事件唤醒后重新进入就绪队列。同一时刻只有一个 future 在运行

use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use std::sync::Arc;

use async_task::{Runnable, Task};
use defines::config::TASK_LIMIT;
use heapless::mpmc::MpMcQueue;

/// NOTE: 目前的实现中，并发的任务量是有硬上限 (`TASK_LIMIT`) 的，超过会直接 panic
type RunQueue = MpMcQueue<Runnable, TASK_LIMIT>;

pub struct Executor {
    queue: Arc<RunQueue>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(MpMcQueue::new()),
        }
    }

    /// 创建一个任务并立刻放入就绪队列
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        let (runnable, task) = async_task::spawn(future, move |runnable| {
            queue.enqueue(runnable).expect("Out of task limit");
        });
        runnable.schedule();
        task
    }

    /// 运行就绪队列中的下一个任务。队列为空时返回 `false`
    pub fn run_once(&self) -> bool {
        match self.queue.dequeue() {
            Some(runnable) => {
                log::trace!("Schedule new task");
                runnable.run();
                true
            }
            None => false,
        }
    }

    /// 一直运行到就绪队列为空，返回运行的次数。
    ///
    /// 返回时剩下的任务要么已经结束，要么在等待某个事件
    pub fn run_until_idle(&self) -> usize {
        let mut polled = 0;
        while self.run_once() {
            polled += 1;
        }
        polled
    }
}

/// 即刻让出控制权，并且立刻 wake（一般而言就是立刻重新进入就绪队列的队尾）
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use klocks::SpinMutex;

    use super::{yield_now, Executor};

    #[test]
    fn spawned_tasks_finish() {
        let executor = Executor::new();
        let task = executor.spawn(async { 1 + 1 });
        assert_eq!(executor.run_until_idle(), 1);
        assert!(task.is_finished());
        assert_eq!(futures::executor::block_on(task), 2);
    }

    #[test]
    fn yield_goes_to_the_tail() {
        let executor = Executor::new();
        let trace = Arc::new(SpinMutex::new(Vec::new()));
        for id in 0..2 {
            let trace = Arc::clone(&trace);
            executor
                .spawn(async move {
                    trace.lock().push((id, 0));
                    yield_now().await;
                    trace.lock().push((id, 1));
                })
                .detach();
        }
        assert_eq!(executor.run_until_idle(), 4);
        assert_eq!(*trace.lock(), [(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn idle_with_blocked_task() {
        let executor = Executor::new();
        let (tx, rx) = futures::channel::oneshot::channel::<u32>();
        let task = executor.spawn(async move { rx.await.unwrap_or(0) });
        executor.run_until_idle();
        assert!(!task.is_finished());
        assert!(!executor.run_once());

        tx.send(7).unwrap();
        executor.run_until_idle();
        assert!(task.is_finished());
        assert_eq!(futures::executor::block_on(task), 7);
    }
}
