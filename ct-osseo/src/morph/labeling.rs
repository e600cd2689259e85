//! 6-连通域标记.

use std::collections::VecDeque;

use itertools::Itertools;

use crate::data::Grid3;

/// 连通域标记结果.
#[derive(Debug)]
pub struct ComponentLabels {
    /// 连通域标签图. 0 为背景, 1 起为连通域编号.
    pub labels: Grid3<u16>,
    /// 各连通域体素数, 下标 `i` 对应标签 `i + 1`, 按体素数降序.
    pub sizes: Vec<usize>,
}

impl ComponentLabels {
    /// 连通域个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// 是否没有任何连通域?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

/// 对二值掩码做 6-连通域标记.
///
/// 体素数小于 `min_size` 的连通域被并入背景, 其余连通域按体素数
/// 从大到小重新编号 (体素数相同时保持首次发现的先后次序).
pub fn label_components(mask: &Grid3<u8>, min_size: usize) -> ComponentLabels {
    let (nz, nh, nw) = mask.shape();
    let mut raw = ndarray::Array3::<u32>::zeros((nz, nh, nw));
    let mut sizes_raw: Vec<usize> = Vec::new();
    let mut queue = VecDeque::new();

    let data = mask.data();
    for z in 0..nz {
        for h in 0..nh {
            for w in 0..nw {
                if data[(z, h, w)] == 0 || raw[(z, h, w)] != 0 {
                    continue;
                }
                let label = sizes_raw.len() as u32 + 1;
                let mut size = 0usize;
                raw[(z, h, w)] = label;
                queue.push_back((z, h, w));
                while let Some((z, h, w)) = queue.pop_front() {
                    size += 1;
                    let mut visit = |idx: (usize, usize, usize)| {
                        if data[idx] != 0 && raw[idx] == 0 {
                            raw[idx] = label;
                            queue.push_back(idx);
                        }
                    };
                    if z > 0 {
                        visit((z - 1, h, w));
                    }
                    if z + 1 < nz {
                        visit((z + 1, h, w));
                    }
                    if h > 0 {
                        visit((z, h - 1, w));
                    }
                    if h + 1 < nh {
                        visit((z, h + 1, w));
                    }
                    if w > 0 {
                        visit((z, h, w - 1));
                    }
                    if w + 1 < nw {
                        visit((z, h, w + 1));
                    }
                }
                sizes_raw.push(size);
            }
        }
    }

    // 按体素数降序重排, 过小的直接清零.
    let mut order: Vec<usize> = (0..sizes_raw.len()).collect();
    order.sort_by_key(|&i| (std::cmp::Reverse(sizes_raw[i]), i));

    let mut remap = vec![0u16; sizes_raw.len() + 1];
    let mut sizes = Vec::new();
    for &i in &order {
        if sizes_raw[i] < min_size {
            break;
        }
        sizes.push(sizes_raw[i]);
        remap[i + 1] = sizes.len() as u16;
    }
    debug_assert!(sizes.iter().tuple_windows().all(|(a, b)| a >= b));

    let mut labels = Grid3::zeros(mask.region(), *mask.geom());
    ndarray::Zip::from(labels.data_mut())
        .and(&raw)
        .par_for_each(|o, &r| {
            *o = remap[r as usize];
        });
    ComponentLabels { labels, sizes }
}
