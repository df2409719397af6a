//! Anatomical labels and orientation sign-flips.
//!
//! A label is a named set of vertices on one hemisphere, read from a
//! FreeSurfer ASCII `.label` file. Within a label, cortical normals point
//! in and out of sulcal walls, so raw time-course averages cancel;
//! [`label_sign_flip`] resolves the ambiguity by aligning every member
//! normal with the label's principal orientation.
use std::path::Path;

use ndarray::Array2;

use crate::error::{MinvError, Result};
use crate::forward::SourceSpace;
use crate::linalg::thin_svd;

/// Cortical hemisphere. Maps to source-space block 0 (`Lh`) / 1 (`Rh`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    Lh,
    Rh,
}

impl Hemisphere {
    pub fn block_index(self) -> usize {
        match self {
            Hemisphere::Lh => 0,
            Hemisphere::Rh => 1,
        }
    }
}

/// Named vertex set on one hemisphere.
#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub hemi: Hemisphere,
    /// Vertex ids in file order.
    pub vertices: Vec<u32>,
}

/// Read a FreeSurfer ASCII label file.
///
/// Layout: a `#` comment line, a vertex count line, then one
/// `vertex x y z value` line per vertex. The hemisphere is taken from
/// the file name (`…-lh.label`, `lh.…`, etc.), as the format itself does
/// not record it.
pub fn read_label(path: &Path) -> Result<Label> {
    let text = std::fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let hemi = if stem.contains("lh") {
        Hemisphere::Lh
    } else if stem.contains("rh") {
        Hemisphere::Rh
    } else {
        return Err(MinvError::InvalidInput(format!(
            "cannot infer hemisphere from label file name {}",
            path.display()
        )));
    };

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    // Comment line.
    let first = lines
        .next()
        .ok_or_else(|| MinvError::InvalidInput(format!("empty label file {}", path.display())))?;
    let count_line = if first.trim_start().starts_with('#') {
        lines.next().ok_or_else(|| {
            MinvError::InvalidInput(format!("label file {} ends after header", path.display()))
        })?
    } else {
        first
    };
    let n: usize = count_line.trim().parse().map_err(|_| {
        MinvError::InvalidInput(format!(
            "label file {}: bad vertex count line {count_line:?}",
            path.display()
        ))
    })?;

    let mut vertices = Vec::with_capacity(n);
    for line in lines {
        let mut cols = line.split_whitespace();
        let v: u32 = cols
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                MinvError::InvalidInput(format!(
                    "label file {}: bad vertex line {line:?}",
                    path.display()
                ))
            })?;
        vertices.push(v);
    }
    if vertices.len() != n {
        return Err(MinvError::InvalidInput(format!(
            "label file {}: header promises {n} vertices, found {}",
            path.display(),
            vertices.len()
        )));
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("label")
        .to_string();
    Ok(Label { name, hemi, vertices })
}

/// Per-vertex signs aligning each label normal with the label's dominant
/// orientation.
///
/// The dominant orientation is the first principal component (leading
/// right-singular vector) of the member normals. Each sign is `+1` when
/// the vertex normal points with it, `-1` against it; an exactly
/// orthogonal normal maps to `+1`. Returned in the label's vertex order,
/// one entry per label vertex present in the source space.
pub fn label_sign_flip(label: &Label, src: &SourceSpace) -> Result<Vec<f64>> {
    let block_idx = label.hemi.block_index();
    let block = src.blocks.get(block_idx).ok_or_else(|| {
        MinvError::InvalidInput(format!(
            "source space has {} blocks, none for hemisphere block {block_idx}",
            src.blocks.len()
        ))
    })?;

    // Rows of the block whose vertex ids appear in the label, label order.
    let mut rows = Vec::with_capacity(label.vertices.len());
    for &v in &label.vertices {
        if let Ok(row) = block.vertices.binary_search(&v) {
            rows.push(row);
        }
    }
    if rows.is_empty() {
        return Err(MinvError::InvalidInput(format!(
            "label {:?} shares no vertices with the source space",
            label.name
        )));
    }

    let mut normals = Array2::<f64>::zeros((rows.len(), 3));
    for (i, &row) in rows.iter().enumerate() {
        for j in 0..3 {
            normals[[i, j]] = block.normals[[row, j]];
        }
    }

    let (_, _, v) = thin_svd(&normals)?;
    let principal = [v[[0, 0]], v[[1, 0]], v[[2, 0]]];

    let flips = rows
        .iter()
        .map(|&row| {
            let dot: f64 = (0..3).map(|j| block.normals[[row, j]] * principal[j]).sum();
            if dot < 0.0 {
                -1.0
            } else {
                1.0
            }
        })
        .collect();
    Ok(flips)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::SourceBlock;
    use ndarray::array;

    fn two_hemi_src() -> SourceSpace {
        // Four lh sources with normals split between +z and -z.
        let lh = SourceBlock {
            vertices: vec![0, 2, 5, 9],
            positions: Array2::zeros((4, 3)),
            normals: array![
                [0.0, 0.0, 1.0],
                [0.1, 0.0, 0.99498743710662],
                [0.0, 0.0, -1.0],
                [0.0, 0.1, 0.99498743710662]
            ],
        };
        let rh = SourceBlock {
            vertices: vec![1, 3],
            positions: Array2::zeros((2, 3)),
            normals: array![[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
        };
        SourceSpace { blocks: vec![lh, rh] }
    }

    #[test]
    fn sign_flip_separates_opposed_normals() {
        let label = Label {
            name: "test-lh".into(),
            hemi: Hemisphere::Lh,
            vertices: vec![0, 2, 5, 9],
        };
        let flips = label_sign_flip(&label, &two_hemi_src()).unwrap();
        assert_eq!(flips.len(), 4);
        // The -z normal must be flipped relative to the +z majority.
        assert_eq!(flips[0], flips[1]);
        assert_eq!(flips[0], flips[3]);
        assert_eq!(flips[2], -flips[0]);
    }

    #[test]
    fn sign_flip_is_deterministic() {
        let label = Label {
            name: "test-lh".into(),
            hemi: Hemisphere::Lh,
            vertices: vec![0, 2, 5],
        };
        let src = two_hemi_src();
        let a = label_sign_flip(&label, &src).unwrap();
        let b = label_sign_flip(&label, &src).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_flip_skips_unknown_vertices() {
        let label = Label {
            name: "test-rh".into(),
            hemi: Hemisphere::Rh,
            vertices: vec![1, 42],
        };
        let flips = label_sign_flip(&label, &two_hemi_src()).unwrap();
        assert_eq!(flips.len(), 1);
    }

    #[test]
    fn sign_flip_empty_intersection_fails() {
        let label = Label {
            name: "test-rh".into(),
            hemi: Hemisphere::Rh,
            vertices: vec![100],
        };
        assert!(matches!(
            label_sign_flip(&label, &two_hemi_src()),
            Err(MinvError::InvalidInput(_))
        ));
    }

    #[test]
    fn read_label_parses_freesurfer_ascii() {
        let dir = std::env::temp_dir();
        let path = dir.join("minv-test-aud-lh.label");
        std::fs::write(
            &path,
            "#!ascii label, test\n3\n10 -1.0 2.0 3.0 0.0\n20 0.0 0.0 0.0 0.0\n30 1.5 2.5 3.5 1.0\n",
        )
        .unwrap();
        let label = read_label(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(label.hemi, Hemisphere::Lh);
        assert_eq!(label.vertices, vec![10, 20, 30]);
    }

    #[test]
    fn read_label_needs_hemisphere_in_name() {
        let dir = std::env::temp_dir();
        let path = dir.join("minv-test-nohemi.label");
        std::fs::write(&path, "#c\n1\n0 0 0 0 0\n").unwrap();
        let res = read_label(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(res, Err(MinvError::InvalidInput(_))));
    }
}
