//! 物理页帧表。
//!
//! 页帧在初始化时一次性分配，之后只在不同的页之间循环使用，从不销毁

use core::{fmt, ops::Index};

use klocks::SpinMutex;
use triomphe::Arc;

use crate::{page_table::PageTableEntry, task::TaskId};

/// 页帧的编号，也就是它在帧表中的下标
pub type FrameId = usize;

pub struct FrameTableEntry {
    id: FrameId,
    inner: SpinMutex<FrameState>,
    data: SpinMutex<Box<[u8]>>,
}

#[derive(Default)]
struct FrameState {
    /// 当前映射到这个页帧的页。若非空，则该页的 `frame` 指向本页帧
    page: Option<Arc<PageTableEntry>>,
    dirty: bool,
    referenced: bool,
    /// 非零时表示有 I/O 正在使用该页帧，不能被选为牺牲者
    lock_count: usize,
    /// 正在进行中的缺页为某个任务预留了该页帧
    reserved_by: Option<TaskId>,
}

/// 选择牺牲页帧时看到的一次快照
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameUsage {
    pub mapped: bool,
    pub dirty: bool,
    pub reserved: bool,
    pub locked: bool,
}

impl FrameTableEntry {
    pub(crate) fn new(id: FrameId, page_size: usize) -> Self {
        Self {
            id,
            inner: SpinMutex::new(FrameState::default()),
            data: SpinMutex::new(vec![0; page_size].into_boxed_slice()),
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn page(&self) -> Option<Arc<PageTableEntry>> {
        self.inner.lock().page.clone()
    }

    pub(crate) fn set_page(&self, page: Option<Arc<PageTableEntry>>) {
        self.inner.lock().page = page;
    }

    /// 拿走当前映射的页，同时清除 dirty 和 referenced
    pub(crate) fn detach(&self) -> Option<Arc<PageTableEntry>> {
        self.inner.lock_with(|state| {
            state.dirty = false;
            state.referenced = false;
            state.page.take()
        })
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.inner.lock().dirty = dirty;
    }

    /// 清除 dirty 位，返回之前的值
    pub(crate) fn take_dirty(&self) -> bool {
        core::mem::take(&mut self.inner.lock().dirty)
    }

    pub fn is_referenced(&self) -> bool {
        self.inner.lock().referenced
    }

    /// 一次访存对页帧造成的影响：总是设置 referenced，写访问还会设置 dirty
    pub(crate) fn mark_access(&self, write: bool) {
        self.inner.lock_with(|state| {
            state.referenced = true;
            state.dirty |= write;
        });
    }

    pub fn lock_count(&self) -> usize {
        self.inner.lock().lock_count
    }

    /// 在 I/O 期间锁住页帧，返回的 guard 被 drop 时解锁
    pub fn lock_io(&self) -> FrameLockGuard<'_> {
        self.inner.lock().lock_count += 1;
        FrameLockGuard { frame: self }
    }

    pub fn reserved_by(&self) -> Option<TaskId> {
        self.inner.lock().reserved_by
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved_by().is_some()
    }

    pub(crate) fn set_reserved(&self, task: TaskId) {
        self.inner.lock().reserved_by = Some(task);
    }

    /// 只有预留者是 `task` 时才解除预留。返回是否解除
    pub(crate) fn set_unreserved(&self, task: TaskId) -> bool {
        self.inner.lock_with(|state| {
            if state.reserved_by == Some(task) {
                state.reserved_by = None;
                true
            } else {
                false
            }
        })
    }

    pub fn usage(&self) -> FrameUsage {
        self.inner.lock_with(|state| FrameUsage {
            mapped: state.page.is_some(),
            dirty: state.dirty,
            reserved: state.reserved_by.is_some(),
            locked: state.lock_count > 0,
        })
    }

    /// 换入完成后建立映射。新换入的页是干净的
    pub(crate) fn commit(&self, page: Arc<PageTableEntry>) {
        self.inner.lock_with(|state| {
            state.page = Some(page);
            state.referenced = true;
            state.dirty = false;
        });
    }

    /// 复制出页帧的全部内容
    pub fn snapshot(&self) -> Box<[u8]> {
        self.data.lock().clone()
    }

    /// 用 `src` 覆盖页帧的内容，`src` 的长度必须等于页大小
    pub fn fill(&self, src: &[u8]) {
        self.data.lock().copy_from_slice(src);
    }

    pub fn load(&self, offset: usize) -> u8 {
        self.data.lock()[offset]
    }

    pub fn store(&self, offset: usize, value: u8) {
        self.data.lock()[offset] = value;
    }
}

impl fmt::Debug for FrameTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("page", &state.page.as_ref().map(|page| (page.task_id(), page.vpn())))
            .field("dirty", &state.dirty)
            .field("referenced", &state.referenced)
            .field("lock_count", &state.lock_count)
            .field("reserved_by", &state.reserved_by)
            .finish()
    }
}

pub struct FrameLockGuard<'a> {
    frame: &'a FrameTableEntry,
}

impl Drop for FrameLockGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.frame.inner.lock();
        debug_assert!(state.lock_count > 0);
        state.lock_count -= 1;
    }
}

/// 定长的页帧表，页帧的编号就是下标
pub struct FrameTable {
    frames: Box<[FrameTableEntry]>,
}

impl FrameTable {
    pub fn new(frame_count: usize, page_size: usize) -> Self {
        Self {
            frames: (0..frame_count)
                .map(|id| FrameTableEntry::new(id, page_size))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameTableEntry> {
        self.frames.iter()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn last(&self) -> Option<&FrameTableEntry> {
        self.frames.last()
    }
}

impl Index<FrameId> for FrameTable {
    type Output = FrameTableEntry;

    fn index(&self, id: FrameId) -> &Self::Output {
        &self.frames[id]
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameTable, FrameUsage};

    #[test]
    fn io_lock_nests() {
        let frames = FrameTable::new(2, 8);
        let frame = &frames[1];
        let outer = frame.lock_io();
        let inner = frame.lock_io();
        assert_eq!(frame.lock_count(), 2);
        drop(inner);
        assert!(frame.usage().locked);
        drop(outer);
        assert_eq!(frame.lock_count(), 0);
    }

    #[test]
    fn unreserve_only_by_holder() {
        let frames = FrameTable::new(1, 8);
        let frame = &frames[0];
        frame.set_reserved(3);
        assert!(!frame.set_unreserved(4));
        assert_eq!(frame.reserved_by(), Some(3));
        assert!(frame.set_unreserved(3));
        assert!(!frame.is_reserved());
    }

    #[test]
    fn access_bits() {
        let frames = FrameTable::new(1, 8);
        let frame = &frames[0];
        frame.mark_access(false);
        assert!(frame.is_referenced() && !frame.is_dirty());
        frame.mark_access(true);
        frame.mark_access(false);
        assert!(frame.is_dirty());
        assert!(frame.take_dirty());
        assert!(!frame.take_dirty());
        assert_eq!(
            frame.usage(),
            FrameUsage {
                mapped: false,
                dirty: false,
                reserved: false,
                locked: false,
            }
        );
    }

    #[test]
    fn contents() {
        let frames = FrameTable::new(1, 4);
        let frame = &frames[0];
        frame.fill(&[1, 2, 3, 4]);
        frame.store(2, 9);
        assert_eq!(frame.load(2), 9);
        assert_eq!(&*frame.snapshot(), &[1, 2, 9, 4]);
    }
}
