use core::sync::atomic::{AtomicU64, Ordering};

use crate::frame_table::FrameId;

/// 记录每个页帧最近一次被访问的逻辑时间。
///
/// 只作为观测数据，选择牺牲页帧时并不使用
pub struct UsageTrail {
    clock: AtomicU64,
    /// 0 表示从未访问，或者映射已经被回收
    last_touched: Box<[AtomicU64]>,
}

impl UsageTrail {
    pub fn new(frame_count: usize) -> Self {
        Self {
            clock: AtomicU64::new(0),
            last_touched: (0..frame_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn touch(&self, frame: FrameId) {
        let now = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(slot) = self.last_touched.get(frame) {
            slot.store(now, Ordering::Relaxed);
        }
    }

    pub fn forget(&self, frame: FrameId) {
        if let Some(slot) = self.last_touched.get(frame) {
            slot.store(0, Ordering::Relaxed);
        }
    }

    pub fn last_touched(&self, frame: FrameId) -> Option<u64> {
        self.last_touched
            .get(frame)
            .map(|slot| slot.load(Ordering::Relaxed))
            .filter(|&time| time != 0)
    }

    /// 被访问过的页帧中最久未被访问的那个
    pub fn least_recently_used(&self) -> Option<FrameId> {
        (0..self.last_touched.len())
            .filter_map(|frame| Some((frame, self.last_touched(frame)?)))
            .min_by_key(|&(_, time)| time)
            .map(|(frame, _)| frame)
    }
}

#[cfg(test)]
mod tests {
    use super::UsageTrail;

    #[test]
    fn recency() {
        let trail = UsageTrail::new(3);
        assert_eq!(trail.least_recently_used(), None);
        trail.touch(2);
        trail.touch(0);
        trail.touch(2);
        assert_eq!(trail.least_recently_used(), Some(0));
        assert!(trail.last_touched(2) > trail.last_touched(0));
        assert_eq!(trail.last_touched(1), None);

        trail.forget(0);
        assert_eq!(trail.least_recently_used(), Some(2));
        // 越界的编号直接忽略
        trail.touch(7);
        assert_eq!(trail.last_touched(7), None);
    }
}
