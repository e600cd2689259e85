//! 全局索引空间中的长方体区域.

use crate::Idx3d;

/// 索引区域: 原点 (可为负, zero-pad 之后) 加上各维大小, 按 (z, h, w) 排列.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region3 {
    /// 区域原点 (全局索引).
    pub origin: [i64; 3],
    /// 各维体素个数.
    pub size: [usize; 3],
}

impl Region3 {
    /// 由原点和大小构造.
    #[inline]
    pub fn new(origin: [i64; 3], size: [usize; 3]) -> Self {
        Self { origin, size }
    }

    /// 原点为零的区域.
    #[inline]
    pub fn from_shape((z, h, w): Idx3d) -> Self {
        Self::new([0; 3], [z, h, w])
    }

    /// 由闭区间角点构造. `max` 各维必须不小于 `min`.
    pub fn from_corners(min: [i64; 3], max: [i64; 3]) -> Self {
        let mut size = [0usize; 3];
        for d in 0..3 {
            debug_assert!(max[d] >= min[d]);
            size[d] = (max[d] - min[d] + 1) as usize;
        }
        Self::new(min, size)
    }

    /// 区域的开区间终点 (各维最后一个体素的下一个索引).
    #[inline]
    pub fn end(&self) -> [i64; 3] {
        [
            self.origin[0] + self.size[0] as i64,
            self.origin[1] + self.size[1] as i64,
            self.origin[2] + self.size[2] as i64,
        ]
    }

    /// 区域体素总数.
    #[inline]
    pub fn len(&self) -> usize {
        self.size.iter().product()
    }

    /// 区域是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size.iter().any(|s| *s == 0)
    }

    /// 每个方向向外扩展 `r` 个体素.
    pub fn pad(&self, r: [usize; 3]) -> Self {
        let mut out = *self;
        for d in 0..3 {
            out.origin[d] -= r[d] as i64;
            out.size[d] += 2 * r[d];
        }
        out
    }

    /// 两个区域的交集. 不相交时返回 `None`.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let mut origin = [0i64; 3];
        let mut size = [0usize; 3];
        let (se, oe) = (self.end(), other.end());
        for d in 0..3 {
            let lo = self.origin[d].max(other.origin[d]);
            let hi = se[d].min(oe[d]);
            if hi <= lo {
                return None;
            }
            origin[d] = lo;
            size[d] = (hi - lo) as usize;
        }
        Some(Self::new(origin, size))
    }

    /// 全局索引是否落在区域内?
    #[inline]
    pub fn contains(&self, idx: [i64; 3]) -> bool {
        let end = self.end();
        (0..3).all(|d| idx[d] >= self.origin[d] && idx[d] < end[d])
    }

    /// `other` 是否完全包含于该区域?
    pub fn contains_region(&self, other: &Self) -> bool {
        let (se, oe) = (self.end(), other.end());
        (0..3).all(|d| other.origin[d] >= self.origin[d] && oe[d] <= se[d])
    }
}
