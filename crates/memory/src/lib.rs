//! 模拟的单 CPU 多线程机器上的请求调页虚拟内存管理。
//!
//! - [`FrameTable`]：全局共享的物理页帧表
//! - [`PageTable`]：每个任务一张的单级页表
//! - [`Mmu`]：地址翻译，必要时触发缺页
//! - [`handle_page_fault`]：缺页处理，负责选择牺牲页帧以及换出换入
//!
//! 线程就是调度器上的 future，所有挂起点（缺页、换入换出、等待别人的缺页）都是 `.await`

#[macro_use]
extern crate log;

mod address;
mod frame_table;
mod mmu;
mod page_fault;
mod page_table;
mod swap;
mod task;
mod thread;
mod usage;


pub use self::{
    address::{VirtAddr, VirtPageNum},
    frame_table::{FrameId, FrameLockGuard, FrameTable, FrameTableEntry, FrameUsage},
    mmu::{AccessType, Mmu},
    page_fault::{handle_page_fault, select_victim},
    page_table::{PageTable, PageTableEntry},
    swap::{MemorySwap, SwapBackend, SwapFile},
    task::{Task, TaskId, TaskStatus},
    thread::{Thread, ThreadId, ThreadStatus, WaitSet},
    usage::UsageTrail,
};
