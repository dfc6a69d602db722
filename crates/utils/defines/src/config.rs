use crate::error::{errno, KResult};

/// 虚拟地址的位数
pub const VIRTUAL_ADDRESS_BITS: u32 = 16;
/// 虚拟地址中页号所占的位数。每个任务的页表因此有 `1 << PAGE_ADDRESS_BITS` 项
pub const PAGE_ADDRESS_BITS: u32 = 6;
/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: u32 = VIRTUAL_ADDRESS_BITS - PAGE_ADDRESS_BITS;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;

/// 物理页帧的数量
pub const FRAME_TABLE_SIZE: usize = 16;

/// 每个任务最多拥有的线程数
pub const MAX_THREADS_PER_TASK: usize = 16;

/// 就绪队列的容量，必须是 2 的幂
pub const TASK_LIMIT: usize = 256;

const _: () = assert!(TASK_LIMIT.is_power_of_two());

/// 模拟机器的内存参数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    pub virtual_address_bits: u32,
    pub page_address_bits: u32,
    pub frame_table_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new(VIRTUAL_ADDRESS_BITS, PAGE_ADDRESS_BITS, FRAME_TABLE_SIZE)
    }
}

impl MemoryConfig {
    pub const fn new(
        virtual_address_bits: u32,
        page_address_bits: u32,
        frame_table_size: usize,
    ) -> Self {
        Self {
            virtual_address_bits,
            page_address_bits,
            frame_table_size,
        }
    }

    /// 用环境变量 `VMM_VIRTUAL_ADDRESS_BITS`、`VMM_PAGE_ADDRESS_BITS`、`VMM_FRAMES` 覆盖默认值。
    ///
    /// 无法解析的变量直接忽略
    pub fn from_env() -> Self {
        fn var<T: core::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok()?.trim().parse().ok()
        }

        let default = Self::default();
        Self {
            virtual_address_bits: var("VMM_VIRTUAL_ADDRESS_BITS")
                .unwrap_or(default.virtual_address_bits),
            page_address_bits: var("VMM_PAGE_ADDRESS_BITS").unwrap_or(default.page_address_bits),
            frame_table_size: var("VMM_FRAMES").unwrap_or(default.frame_table_size),
        }
    }

    pub fn validate(&self) -> KResult<()> {
        if self.virtual_address_bits == 0 || self.virtual_address_bits > 32 {
            return Err(errno::EINVAL);
        }
        if self.page_address_bits > self.virtual_address_bits {
            return Err(errno::EINVAL);
        }
        if self.frame_table_size == 0 {
            return Err(errno::EINVAL);
        }
        Ok(())
    }

    /// 页内偏移的位数
    #[inline]
    pub const fn page_offset_bits(&self) -> u32 {
        self.virtual_address_bits - self.page_address_bits
    }

    #[inline]
    pub const fn page_size(&self) -> usize {
        1 << self.page_offset_bits()
    }

    /// 每个任务的虚拟页数量，也就是页表的项数
    #[inline]
    pub const fn page_count(&self) -> usize {
        1 << self.page_address_bits
    }

    /// 虚拟地址空间的字节数，也是每个任务交换文件的大小
    #[inline]
    pub const fn address_space_size(&self) -> usize {
        1 << self.virtual_address_bits
    }
}
