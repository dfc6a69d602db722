//! 虚拟地址与虚拟页号。
//!
//! 地址空间的几何参数是运行时配置的（见 [`MemoryConfig`]），所以拆分地址时需要传入页内偏移的位数

use core::fmt;

use defines::config::MemoryConfig;

/// 虚拟地址。高 `page_address_bits` 位是页号，其余是页内偏移
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// 当前虚地址所在的虚拟页号
    #[inline]
    pub const fn vpn(self, config: &MemoryConfig) -> VirtPageNum {
        VirtPageNum(self.0 >> config.page_offset_bits())
    }

    #[inline]
    pub const fn page_offset(self, config: &MemoryConfig) -> usize {
        self.0 & (config.page_size() - 1)
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA:{:#x}", self.0)
    }
}

/// 虚拟页号，也是页在页表中的下标，以及页在交换文件中的编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum(pub usize);

impl VirtPageNum {
    #[inline]
    pub const fn page_start(self, config: &MemoryConfig) -> VirtAddr {
        VirtAddr(self.0 << config.page_offset_bits())
    }
}
