//! 交换文件。
//!
//! 每个任务有一个交换文件，按页编号存放不在内存中的页的内容。
//! 真正的存储由 [`SwapBackend`] 提供，[`SwapFile`] 负责在传输期间挂起线程、锁住页帧

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use defines::{
    config::MemoryConfig,
    error::{errno, KResult},
};
use executor::yield_now;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use klocks::SpinMutex;

use crate::{frame_table::FrameTableEntry, thread::Thread};

/// 交换文件的后端存储，以页为单位读写
pub trait SwapBackend: Send + Sync {
    /// 读出编号为 `page_id` 的页。从未写过的页读出全零
    fn read<'a>(&'a self, page_id: usize, buf: &'a mut [u8]) -> BoxFuture<'a, KResult<()>>;
    fn write<'a>(&'a self, page_id: usize, buf: &'a [u8]) -> BoxFuture<'a, KResult<()>>;
    fn close(&self) {}
}

/// 放在内存中的交换区。
///
/// 每次读写前让出 `latency` 次 CPU，模拟 I/O 的耗时
pub struct MemorySwap {
    pages: SpinMutex<HashMap<usize, Box<[u8]>>>,
    capacity: usize,
    page_size: usize,
    latency: usize,
}

impl MemorySwap {
    /// 容量为整个虚拟地址空间
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            pages: SpinMutex::new(HashMap::new()),
            capacity: config.page_count(),
            page_size: config.page_size(),
            latency: 1,
        }
    }

    pub fn with_latency(mut self, latency: usize) -> Self {
        self.latency = latency;
        self
    }

    /// 某一页当前在交换区中的内容
    pub fn page(&self, page_id: usize) -> Option<Box<[u8]>> {
        self.pages.lock().get(&page_id).cloned()
    }

    fn check(&self, page_id: usize, len: usize) -> KResult<()> {
        if page_id >= self.capacity || len != self.page_size {
            return Err(errno::EINVAL);
        }
        Ok(())
    }

    async fn delay(&self) {
        for _ in 0..self.latency {
            yield_now().await;
        }
    }
}

impl SwapBackend for MemorySwap {
    fn read<'a>(&'a self, page_id: usize, buf: &'a mut [u8]) -> BoxFuture<'a, KResult<()>> {
        Box::pin(async move {
            self.check(page_id, buf.len())?;
            self.delay().await;
            self.pages.lock_with(|pages| match pages.get(&page_id) {
                Some(page) => buf.copy_from_slice(page),
                None => buf.fill(0),
            });
            Ok(())
        })
    }

    fn write<'a>(&'a self, page_id: usize, buf: &'a [u8]) -> BoxFuture<'a, KResult<()>> {
        Box::pin(async move {
            self.check(page_id, buf.len())?;
            self.delay().await;
            self.pages.lock().insert(page_id, buf.into());
            Ok(())
        })
    }
}

/// 任务持有的交换文件句柄
pub struct SwapFile {
    backend: Arc<dyn SwapBackend>,
    closed: AtomicBool,
    page_size: usize,
}

impl SwapFile {
    pub fn new(backend: Arc<dyn SwapBackend>, page_size: usize) -> Self {
        Self {
            backend,
            closed: AtomicBool::new(false),
            page_size,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.backend.close();
        }
    }

    /// 把页帧的内容写到交换文件的 `page_id` 处。传输期间 `thread` 挂起，页帧被锁住
    pub async fn write(
        &self,
        page_id: usize,
        frame: &FrameTableEntry,
        thread: &Thread,
    ) -> KResult<()> {
        if self.is_closed() {
            return Err(errno::EBADF);
        }
        let _locked = frame.lock_io();
        thread.block();
        let _resume = scopeguard::guard((), |()| thread.unblock());
        let buf = frame.snapshot();
        self.backend.write(page_id, &buf).await
    }

    /// 从交换文件的 `page_id` 处读出内容填入页帧
    pub async fn read(
        &self,
        page_id: usize,
        frame: &FrameTableEntry,
        thread: &Thread,
    ) -> KResult<()> {
        if self.is_closed() {
            return Err(errno::EBADF);
        }
        let _locked = frame.lock_io();
        thread.block();
        let _resume = scopeguard::guard((), |()| thread.unblock());
        let mut buf = vec![0; self.page_size];
        self.backend.read(page_id, &mut buf).await?;
        frame.fill(&buf);
        Ok(())
    }
}
