use std::sync::Arc;

use atomic::{Atomic, Ordering};
use defines::{
    config::MAX_THREADS_PER_TASK,
    error::{errno, KResult},
};
use klocks::SpinMutex;

use crate::{
    mmu::Mmu,
    page_table::PageTable,
    swap::{SwapBackend, SwapFile},
    thread::{Thread, ThreadId},
};

pub type TaskId = usize;

#[derive(bytemuck::NoUninit, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    Live,
    Terminated,
}

/// 任务，即一个地址空间。拥有一张页表和一个交换文件
pub struct Task {
    tid: TaskId,
    mmu: Arc<Mmu>,
    pub page_table: PageTable,
    pub swap_file: SwapFile,
    status: Atomic<TaskStatus>,
    inner: SpinMutex<TaskInner>,
}

struct TaskInner {
    threads: Vec<Arc<Thread>>,
}

impl Task {
    pub fn new(mmu: &Arc<Mmu>, backend: Arc<dyn SwapBackend>) -> Arc<Self> {
        let tid = mmu.alloc_task_id();
        let config = mmu.config();
        let task = Arc::new_cyclic(|this| Self {
            tid,
            mmu: Arc::clone(mmu),
            page_table: PageTable::new(tid, this, config.page_count()),
            swap_file: SwapFile::new(backend, config.page_size()),
            status: Atomic::new(TaskStatus::Live),
            inner: SpinMutex::new(TaskInner {
                threads: Vec::new(),
            }),
        });
        info!("task {tid} created with {} pages", config.page_count());
        task
    }

    pub fn tid(&self) -> TaskId {
        self.tid
    }

    pub fn status(&self) -> TaskStatus {
        self.status.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.status() == TaskStatus::Terminated
    }

    /// 在任务中创建一个新线程。任务已终止时返回 `ESRCH`，线程数达到上限时返回 `EAGAIN`
    pub fn spawn_thread(self: &Arc<Self>) -> KResult<Arc<Thread>> {
        if self.is_terminated() {
            return Err(errno::ESRCH);
        }
        let mut inner = self.inner.lock();
        if inner.threads.len() >= MAX_THREADS_PER_TASK {
            return Err(errno::EAGAIN);
        }
        let thread = Arc::new(Thread::new(
            self.mmu.alloc_thread_id(),
            self.tid,
            Arc::downgrade(self),
        ));
        inner.threads.push(Arc::clone(&thread));
        Ok(thread)
    }

    pub fn remove_thread(&self, tid: ThreadId) -> Option<Arc<Thread>> {
        let mut inner = self.inner.lock();
        let index = inner.threads.iter().position(|thread| thread.tid() == tid)?;
        Some(inner.threads.swap_remove(index))
    }

    pub fn thread_count(&self) -> usize {
        self.inner.lock().threads.len()
    }

    /// 杀死任务：杀死所有线程，回收内存，关闭交换文件。可以重复调用
    pub fn kill(&self) {
        let threads = core::mem::take(&mut self.inner.lock().threads);
        for thread in &threads {
            thread.kill();
        }
        if self
            .status
            .swap(TaskStatus::Terminated, Ordering::AcqRel)
            == TaskStatus::Terminated
        {
            return;
        }
        info!("kill task {} with {} thread(s)", self.tid, threads.len());
        self.page_table.deallocate_memory(&self.mmu);
        self.swap_file.close();
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("tid", &self.tid)
            .field("status", &self.status())
            .field("threads", &self.thread_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use defines::{
        config::{MemoryConfig, MAX_THREADS_PER_TASK},
        error::errno,
    };

    use super::{Task, TaskStatus};
    use crate::{mmu::Mmu, swap::MemorySwap};

    #[test]
    fn thread_limit() {
        let config = MemoryConfig::new(8, 2, 2);
        let mmu = Mmu::new(config).unwrap();
        let task = Task::new(&mmu, Arc::new(MemorySwap::new(&config)));
        for _ in 0..MAX_THREADS_PER_TASK {
            task.spawn_thread().unwrap();
        }
        assert_eq!(task.spawn_thread().unwrap_err(), errno::EAGAIN);
        assert_eq!(task.thread_count(), MAX_THREADS_PER_TASK);

        let first = task.remove_thread(1).map(|thread| thread.tid());
        assert_eq!(first, Some(1));
        assert!(task.spawn_thread().is_ok());
    }

    #[test]
    fn remove_and_kill() {
        let config = MemoryConfig::new(8, 2, 2);
        let mmu = Mmu::new(config).unwrap();
        let task = Task::new(&mmu, Arc::new(MemorySwap::new(&config)));
        let a = task.spawn_thread().unwrap();
        let b = task.spawn_thread().unwrap();
        assert_ne!(a.tid(), b.tid());
        assert!(Arc::ptr_eq(&task.remove_thread(a.tid()).unwrap(), &a));
        assert!(task.remove_thread(a.tid()).is_none());

        task.kill();
        assert_eq!(task.status(), TaskStatus::Terminated);
        assert!(b.is_killed());
        // 被移除的线程不受影响
        assert!(!a.is_killed());
        assert!(task.swap_file.is_closed());
        assert_eq!(task.spawn_thread().unwrap_err(), errno::ESRCH);
        task.kill();
        assert_eq!(task.thread_count(), 0);
    }
}
