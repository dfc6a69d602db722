//! 地址翻译。
//!
//! 每次访存都经过 [`Mmu::refer`]：找到地址所在的页，页无效时触发缺页或者等待进行中的缺页，
//! 最后更新页帧的 referenced/dirty 位

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use defines::{
    config::MemoryConfig,
    error::{errno, KResult},
};
use triomphe::Arc as PageArc;

use crate::{
    address::VirtAddr,
    frame_table::{FrameId, FrameTable},
    page_fault,
    page_table::PageTableEntry,
    task::{Task, TaskId},
    thread::{Thread, ThreadId},
    usage::UsageTrail,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
}

/// 模拟机器的内存管理单元，持有全局共享的帧表
pub struct Mmu {
    config: MemoryConfig,
    frames: FrameTable,
    usage: UsageTrail,
    next_task_id: AtomicUsize,
    next_thread_id: AtomicUsize,
}

impl Mmu {
    pub fn new(config: MemoryConfig) -> KResult<Arc<Self>> {
        config.validate()?;
        info!(
            "mmu: {} frame(s) of {} bytes, {} pages per task",
            config.frame_table_size,
            config.page_size(),
            config.page_count()
        );
        Ok(Arc::new(Self {
            config,
            frames: FrameTable::new(config.frame_table_size, config.page_size()),
            usage: UsageTrail::new(config.frame_table_size),
            next_task_id: AtomicUsize::new(1),
            next_thread_id: AtomicUsize::new(1),
        }))
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn usage(&self) -> &UsageTrail {
        &self.usage
    }

    pub(crate) fn alloc_task_id(&self) -> TaskId {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn alloc_thread_id(&self) -> ThreadId {
        self.next_thread_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 地址在 `task` 中对应的页。地址越界时返回 `EFAULT`
    pub fn page_of(&self, task: &Task, addr: VirtAddr) -> KResult<PageArc<PageTableEntry>> {
        if addr.0 >= self.config.address_space_size() {
            return Err(errno::EFAULT);
        }
        task.page_table
            .get(addr.vpn(&self.config))
            .cloned()
            .ok_or(errno::EFAULT)
    }

    /// 以 `access` 的方式访问 `addr`，返回它所在的页。
    ///
    /// 缺页失败不会作为错误返回，返回的页此时仍然无效；线程在挂起期间被杀死时也一样，
    /// 调用者需要自己检查。只有地址越界和线程的任务已经不存在时返回错误
    pub async fn refer(
        &self,
        addr: VirtAddr,
        access: AccessType,
        thread: &Arc<Thread>,
    ) -> KResult<PageArc<PageTableEntry>> {
        let task = thread.task()?;
        let page = self.page_of(&task, addr)?;
        drop(task);

        loop {
            if page.is_valid() {
                break;
            }
            if page.fault_in_flight() {
                page.waiters.wait(thread).await;
                if thread.is_killed() {
                    debug!("thread {} killed while waiting for {addr:?}", thread.tid());
                    return Ok(page);
                }
                // 缺页失败时页仍然无效，下一轮由自己来处理
                continue;
            }
            if let Err(e) = self.handle_page_fault(thread, access, &page).await {
                debug!("fault on {addr:?} by thread {} failed: {e}", thread.tid());
            }
            break;
        }

        if thread.is_killed() {
            return Ok(page);
        }
        // 线程被调度出去的期间，页帧可能又被别的缺页抢走
        if let Some(frame) = page.resident_frame() {
            self.frames[frame].mark_access(access == AccessType::Write);
            self.usage.touch(frame);
            trace!("thread {} {access:?} {addr:?} -> frame {frame}", thread.tid());
        }
        Ok(page)
    }

    /// 交给缺页处理程序，返回时缺页已经处理完毕
    pub async fn handle_page_fault(
        &self,
        thread: &Arc<Thread>,
        access: AccessType,
        page: &PageArc<PageTableEntry>,
    ) -> KResult<()> {
        page_fault::handle_page_fault(self, thread, access, page).await
    }

    /// 读一个字节
    pub async fn load(&self, addr: VirtAddr, thread: &Arc<Thread>) -> KResult<u8> {
        let page = self.refer(addr, AccessType::Read, thread).await?;
        let frame = resident(&page, thread)?;
        Ok(self.frames[frame].load(addr.page_offset(&self.config)))
    }

    /// 写一个字节
    pub async fn store(&self, addr: VirtAddr, value: u8, thread: &Arc<Thread>) -> KResult<()> {
        let page = self.refer(addr, AccessType::Write, thread).await?;
        let frame = resident(&page, thread)?;
        self.frames[frame].store(addr.page_offset(&self.config), value);
        Ok(())
    }
}

/// 访存完成后页所在的页帧。线程已死返回 `THREAD_KILLED`，页仍然无效返回 `EAGAIN`
fn resident(page: &PageTableEntry, thread: &Thread) -> KResult<FrameId> {
    if thread.is_killed() {
        return Err(errno::THREAD_KILLED);
    }
    page.resident_frame().ok_or(errno::EAGAIN)
}

impl core::fmt::Debug for Mmu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mmu")
            .field("config", &self.config)
            .field("frames", &self.frames.len())
            .finish_non_exhaustive()
    }
}
