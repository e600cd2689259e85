//! 阈值约束的种子区域生长.

use std::collections::VecDeque;

use crate::data::Grid3;

/// 从 `seeds` (全局索引) 出发做 6-连通生长, 只接纳灰度不低于 `lower`
/// 的体素. 越界或低于阈值的种子被忽略.
pub fn connected_threshold(scan: &Grid3<f32>, seeds: &[[i64; 3]], lower: f32) -> Grid3<u8> {
    let (nz, nh, nw) = scan.shape();
    let mut out = Grid3::zeros(scan.region(), *scan.geom());
    let origin = scan.index_origin();
    let data = scan.data();
    let mut queue = VecDeque::new();

    {
        let mut visited = out.data_mut();
        for s in seeds {
            if !scan.region().contains(*s) {
                continue;
            }
            let l = (
                (s[0] - origin[0]) as usize,
                (s[1] - origin[1]) as usize,
                (s[2] - origin[2]) as usize,
            );
            if data[l] >= lower && visited[l] == 0 {
                visited[l] = 1;
                queue.push_back(l);
            }
        }
        while let Some((z, h, w)) = queue.pop_front() {
            let mut visit = |idx: (usize, usize, usize)| {
                if visited[idx] == 0 && data[idx] >= lower {
                    visited[idx] = 1;
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
    }
    out
}
