//! 每个任务一张的单级页表，以及任务退出时的内存回收

use core::fmt;
use std::sync::{Arc as StdArc, Weak};

use klocks::SpinMutex;
use triomphe::Arc;

use crate::{
    address::VirtPageNum,
    frame_table::FrameId,
    mmu::Mmu,
    task::{Task, TaskId},
    thread::{Thread, WaitSet},
};

pub struct PageTableEntry {
    vpn: VirtPageNum,
    task_id: TaskId,
    task: Weak<Task>,
    inner: SpinMutex<PageState>,
    /// 在本页上等待进行中的缺页结束的其他线程
    pub waiters: WaitSet,
}

#[derive(Default)]
struct PageState {
    valid: bool,
    frame: Option<FrameId>,
    /// 正在为本页处理缺页的线程。非空即表示有缺页正在进行，同一时刻至多一个
    validating_thread: Option<StdArc<Thread>>,
}

impl PageTableEntry {
    fn new(vpn: VirtPageNum, task_id: TaskId, task: Weak<Task>) -> Self {
        Self {
            vpn,
            task_id,
            task,
            inner: SpinMutex::new(PageState::default()),
            waiters: WaitSet::new(),
        }
    }

    pub fn vpn(&self) -> VirtPageNum {
        self.vpn
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task(&self) -> Option<StdArc<Task>> {
        self.task.upgrade()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.lock().valid
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.inner.lock().frame
    }

    /// 页有效时返回它所在的页帧
    pub fn resident_frame(&self) -> Option<FrameId> {
        self.inner
            .lock_with(|state| if state.valid { state.frame } else { None })
    }

    pub fn validating_thread(&self) -> Option<StdArc<Thread>> {
        self.inner.lock().validating_thread.clone()
    }

    pub fn fault_in_flight(&self) -> bool {
        self.inner.lock().validating_thread.is_some()
    }

    pub(crate) fn set_frame(&self, frame: Option<FrameId>) {
        self.inner.lock().frame = frame;
    }

    pub(crate) fn set_validating(&self, thread: &StdArc<Thread>) {
        let prev = self
            .inner
            .lock()
            .validating_thread
            .replace(StdArc::clone(thread));
        debug_assert!(prev.is_none(), "two faults in flight on {:?}", self.vpn);
    }

    /// 只有当前的验证线程是 `thread` 时才清除
    pub(crate) fn clear_validating(&self, thread: &StdArc<Thread>) {
        self.inner.lock_with(|state| {
            if state
                .validating_thread
                .as_ref()
                .is_some_and(|validating| StdArc::ptr_eq(validating, thread))
            {
                state.validating_thread = None;
            }
        });
    }

    /// 换入完成，本页在 `frame` 中有效
    pub(crate) fn validate(&self, frame: FrameId) {
        self.inner.lock_with(|state| {
            state.valid = true;
            state.frame = Some(frame);
            state.validating_thread = None;
        });
    }

    pub(crate) fn invalidate(&self) {
        self.inner.lock_with(|state| {
            state.valid = false;
            state.frame = None;
        });
    }

    /// 撤销缺页过程中建立的页到 `frame` 的关联。页已经有效时什么都不做
    pub(crate) fn rollback(&self, frame: FrameId) {
        self.inner.lock_with(|state| {
            if !state.valid && state.frame == Some(frame) {
                state.frame = None;
            }
        });
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Page")
            .field("vpn", &self.vpn.0)
            .field("task_id", &self.task_id)
            .field("valid", &state.valid)
            .field("frame", &state.frame)
            .field(
                "validating_thread",
                &state.validating_thread.as_ref().map(|thread| thread.tid()),
            )
            .finish()
    }
}

pub struct PageTable {
    task_id: TaskId,
    pages: Box<[Arc<PageTableEntry>]>,
}

impl PageTable {
    pub(crate) fn new(task_id: TaskId, task: &Weak<Task>, page_count: usize) -> Self {
        Self {
            task_id,
            pages: (0..page_count)
                .map(|vpn| Arc::new(PageTableEntry::new(VirtPageNum(vpn), task_id, task.clone())))
                .collect(),
        }
    }

    pub fn get(&self, vpn: VirtPageNum) -> Option<&Arc<PageTableEntry>> {
        self.pages.get(vpn.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PageTableEntry>> {
        self.pages.iter()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 回收本任务占用的所有页帧，返回回收的页帧数。
    ///
    /// 扫描的是帧表而不是页表，时间与页帧数成正比。可以重复调用
    pub fn deallocate_memory(&self, mmu: &Mmu) -> usize {
        let mut freed = 0;
        for frame in mmu.frames().iter() {
            if frame.reserved_by() == Some(self.task_id) {
                frame.set_unreserved(self.task_id);
            }
            let owned = frame
                .page()
                .is_some_and(|page| page.task_id() == self.task_id);
            if !owned {
                continue;
            }
            if let Some(page) = frame.detach() {
                page.invalidate();
            }
            mmu.usage().forget(frame.id());
            freed += 1;
        }
        info!("task {} released {freed} frame(s)", self.task_id);
        freed
    }
}
