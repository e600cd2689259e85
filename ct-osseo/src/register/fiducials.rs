//! 3D Slicer fcsv 地标文件读取.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use nalgebra::Vector3;

use crate::error::RegisterError;

/// 读取 Slicer Markups fcsv 文件中的地标物理坐标.
///
/// 前三行是注释: 版本行, 坐标系行, 列名行. 坐标系行以 `RAS`/`0`,
/// `LPS`/`1` 或 `IJK`/`2` 结尾; RAS 坐标转换为 LPS (翻转 x, y),
/// IJK 不支持. 数据行为 `id,x,y,z,...` 的 CSV.
pub fn read_fcsv<P: AsRef<Path>>(path: P) -> Result<Vec<Vector3<f64>>, RegisterError> {
    let f = BufReader::new(File::open(path)?);
    let mut lines = f.lines();

    // 版本行.
    lines.next().transpose()?;
    let coord_line = lines.next().transpose()?.unwrap_or_default();
    let tail: String = coord_line
        .chars()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let ras = if tail == "RAS" || tail.ends_with('0') {
        true
    } else if tail == "LPS" || tail.ends_with('1') {
        false
    } else if tail == "IJK" || tail.ends_with('2') {
        return Err(RegisterError::UnsupportedCoordinateSystem(
            "IJK".to_owned(),
        ));
    } else {
        return Err(RegisterError::UnsupportedCoordinateSystem(coord_line));
    };
    // 列名行.
    lines.next().transpose()?;

    let mut points = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // 数据行从第 4 行起.
        let lineno = i + 4;
        let mut fields = line.split(',');
        // 第一列是 ID.
        fields.next();
        let mut p = Vector3::zeros();
        for col in 0..3 {
            let field = fields.next().ok_or_else(|| RegisterError::MalformedFiducial {
                line: lineno,
                reason: "坐标列不足".to_owned(),
            })?;
            p[col] = field
                .trim()
                .parse::<f64>()
                .map_err(|e| RegisterError::MalformedFiducial {
                    line: lineno,
                    reason: e.to_string(),
                })?;
            if ras && col < 2 {
                p[col] = -p[col];
            }
        }
        points.push(p);
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fcsv(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("ct-osseo-fcsv");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn ras_coordinates_are_flipped_to_lps() {
        let path = write_fcsv(
            "ras.fcsv",
            "# Markups fiducial file version = 4.10\n\
             # CoordinateSystem = RAS\n\
             # columns = id,x,y,z,ow,ox,oy,oz,vis,sel,lock,label,desc,associatedNodeID\n\
             F-1,1.5,-2.0,3.0,0,0,0,1,1,1,0,F-1,,\n\
             F-2,-4.0,5.0,-6.0,0,0,0,1,1,1,0,F-2,,\n",
        );
        let pts = read_fcsv(path).unwrap();
        assert_eq!(pts.len(), 2);
        assert_eq!(pts[0], Vector3::new(-1.5, 2.0, 3.0));
        assert_eq!(pts[1], Vector3::new(4.0, -5.0, -6.0));
    }

    #[test]
    fn lps_numeric_tag_is_accepted_verbatim() {
        let path = write_fcsv(
            "lps.fcsv",
            "# Markups fiducial file version = 4.10\n\
             # CoordinateSystem = 1\n\
             # columns = id,x,y,z\n\
             F-1,7.0,8.0,9.0\n",
        );
        let pts = read_fcsv(path).unwrap();
        assert_eq!(pts, vec![Vector3::new(7.0, 8.0, 9.0)]);
    }

    #[test]
    fn ijk_coordinates_are_rejected() {
        let path = write_fcsv(
            "ijk.fcsv",
            "# version\n# CoordinateSystem = IJK\n# columns\nF-1,0,0,0\n",
        );
        assert!(matches!(
            read_fcsv(path).unwrap_err(),
            RegisterError::UnsupportedCoordinateSystem(_)
        ));
    }

    #[test]
    fn malformed_row_reports_line_number() {
        let path = write_fcsv(
            "bad.fcsv",
            "# version\n# CoordinateSystem = LPS\n# columns\nF-1,1.0,oops,3.0\n",
        );
        assert!(matches!(
            read_fcsv(path).unwrap_err(),
            RegisterError::MalformedFiducial { line: 4, .. }
        ));
    }
}
