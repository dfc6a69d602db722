//! 缺页处理与牺牲页帧的选择。
//!
//! 一次缺页严格按照 预留页帧 -> 换出 -> 换入 -> 提交 的顺序进行。
//! 缺页之间没有全局锁，页帧的 `reserved_by` 和页的 `validating_thread` 是唯一的互斥手段。
//!
//! 线程可能在任何一次挂起期间被杀死，恢复后必须先检查自己是否还活着，再去修改共享状态。
//! 不论以何种方式退出，预留和验证线程都会被清除，页上的等待者都会被唤醒

use std::sync::Arc;

use defines::error::{errno, KResult};
use executor::yield_now;
use triomphe::Arc as PageArc;

use crate::{
    frame_table::{FrameId, FrameTable, FrameTableEntry, FrameUsage},
    mmu::{AccessType, Mmu},
    page_table::PageTableEntry,
    thread::{Thread, WaitSet},
};

/// 处理 `thread` 在 `page` 上的缺页，返回时缺页已经处理完毕。
///
/// 调用者需要保证 `page` 上没有正在进行的缺页。
///
/// # Errors
///
/// - `ALREADY_VALID`：页在处理之前已经有效
/// - `ENOMEM`：找不到可用的页帧
/// - `THREAD_KILLED`：线程在换入或换出期间被杀死
/// - 交换文件的 I/O 错误
pub async fn handle_page_fault(
    mmu: &Mmu,
    thread: &Arc<Thread>,
    access: AccessType,
    page: &PageArc<PageTableEntry>,
) -> KResult<()> {
    debug!(
        "thread {} faults on page {} of task {} ({access:?})",
        thread.tid(),
        page.vpn().0,
        page.task_id()
    );
    let result = resolve(mmu, thread, page).await;
    match result {
        Ok(()) => debug!("page {} of task {} is valid", page.vpn().0, page.task_id()),
        Err(e) => debug!("fault on page {} failed: {e}", page.vpn().0),
    }
    // 不论结果如何都交还给调度器
    yield_now().await;
    result
}

#[derive(Default)]
struct FaultProgress {
    /// 已经预留的页帧
    frame: Option<FrameId>,
    committed: bool,
}

async fn resolve(mmu: &Mmu, thread: &Arc<Thread>, page: &PageArc<PageTableEntry>) -> KResult<()> {
    if page.is_valid() {
        page.waiters.notify_all();
        return Err(errno::ALREADY_VALID);
    }

    let task_id = page.task_id();
    // 私有的等待令牌，供 I/O 完成时唤醒本线程。页上的等待集合是给其他线程用的
    let token = WaitSet::new();
    token.enqueue(thread);

    let mut progress = scopeguard::guard(FaultProgress::default(), |progress| {
        if !progress.committed {
            if let Some(frame) = progress.frame {
                page.rollback(frame);
                mmu.frames()[frame].set_unreserved(task_id);
            }
            page.clear_validating(thread);
        }
        page.waiters.notify_all();
        token.notify_all();
    });

    let Some(victim) = select_victim(mmu.frames()) else {
        warn!("out of memory on page {} of task {task_id}", page.vpn().0);
        return Err(errno::ENOMEM);
    };
    let frame_id = victim.id();
    victim.set_reserved(task_id);
    progress.frame = Some(frame_id);
    page.set_validating(thread);

    if let Some(old) = victim.page() {
        swap_out(thread, victim, &old).await?;
        victim.detach();
        old.invalidate();
        mmu.usage().forget(frame_id);
    }

    page.set_frame(Some(frame_id));
    let owner = page.task().ok_or(errno::ESRCH)?;
    debug!("swap in page {} of task {task_id} to frame {frame_id}", page.vpn().0);
    let read = owner.swap_file.read(page.vpn().0, victim, thread).await;
    drop(owner);
    if thread.is_killed() {
        debug!("thread {} killed during swap-in", thread.tid());
        return Err(errno::THREAD_KILLED);
    }
    read?;

    victim.commit(PageArc::clone(page));
    page.validate(frame_id);
    if !victim.set_unreserved(task_id) {
        // 预留被强行选择覆盖，另一个缺页之后还会提交到同一个页帧上
        warn!(
            "frame {frame_id} was taken over by a forced victim choice, page {} of task {task_id} now shares it",
            page.vpn().0
        );
    }
    mmu.usage().touch(frame_id);
    progress.committed = true;
    Ok(())
}

/// 把页帧中的旧页写回它所属任务的交换文件。
///
/// 写出期间旧页仍然有效，可能再次被写脏，所以一直写到页帧干净为止。
/// 失败时恢复 dirty 位，旧页保持原样
async fn swap_out(
    thread: &Thread,
    victim: &FrameTableEntry,
    old: &PageArc<PageTableEntry>,
) -> KResult<()> {
    while victim.take_dirty() {
        let written = match old.task() {
            Some(owner) if !owner.is_terminated() => {
                debug!(
                    "swap out page {} of task {} from frame {}",
                    old.vpn().0,
                    old.task_id(),
                    victim.id()
                );
                owner.swap_file.write(old.vpn().0, victim, thread).await
            }
            _ => {
                warn!(
                    "owner of page {} is gone, drop frame {} without writing back",
                    old.vpn().0,
                    victim.id()
                );
                Ok(())
            }
        };
        if thread.is_killed() {
            debug!("thread {} killed during swap-out", thread.tid());
            victim.set_dirty(true);
            return Err(errno::THREAD_KILLED);
        }
        if let Err(e) = written {
            victim.set_dirty(true);
            return Err(e);
        }
    }
    Ok(())
}

/// 按下标顺序扫描帧表选择牺牲页帧，每一级取第一个满足条件的：
///
/// 1. 未映射、未预留、未锁住
/// 2. 映射了干净的页、未预留、未锁住
/// 3. 任意未预留、未锁住的页帧
///
/// 都找不到时强行选择最后一个页帧，即使它已被预留或锁住。只有帧表为空时返回 `None`
pub fn select_victim(frames: &FrameTable) -> Option<&FrameTableEntry> {
    let usages: Vec<FrameUsage> = frames.iter().map(FrameTableEntry::usage).collect();
    let tiers: [fn(&FrameUsage) -> bool; 3] = [
        |usage| !usage.mapped,
        |usage| usage.mapped && !usage.dirty,
        |_| true,
    ];
    for (level, tier) in tiers.iter().enumerate() {
        let found = frames
            .iter()
            .zip(&usages)
            .find(|(_, usage)| !usage.reserved && !usage.locked && tier(usage));
        if let Some((frame, _)) = found {
            trace!("victim frame {} at tier {}", frame.id(), level + 1);
            return Some(frame);
        }
    }
    let fallback = frames.last()?;
    warn!("every frame is reserved or locked, force frame {} as victim", fallback.id());
    Some(fallback)
}
