// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Multi-stage sparse chains executed as one engine invocation.

use crate::formatter::{SparseFormatter, SparseMatrixBuffer};
use crate::image::SparseImage;
use crate::SparseError;

/// An ordered chain of sparse stages concatenated into one image.
///
/// Stage `i` feeds stage `i + 1`, so the logical output width of every
/// stage equals the logical input width of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct StageGroup {
    image: SparseImage,
}

impl StageGroup {
    /// Validates and concatenates `stages`.
    ///
    /// Capacity is checked for every stage before the chain is examined,
    /// so an oversized stage is reported even when the chain is also broken.
    pub fn build(
        stages: &[SparseMatrixBuffer],
        formatter: &SparseFormatter,
        max_stages: usize,
    ) -> Result<Self, SparseError> {
        if stages.is_empty() {
            return Err(SparseError::EmptyGroup);
        }
        if stages.len() > max_stages {
            return Err(SparseError::CapacityExceeded {
                what: "stages",
                value: stages.len(),
                limit: max_stages,
            });
        }
        for stage in stages {
            let (m, k) = stage.shape();
            formatter.check_capacity(m, k, stage.nnz())?;
        }
        for (i, pair) in stages.windows(2).enumerate() {
            let out_width = pair[0].shape().0;
            let in_width = pair[1].shape().1;
            if out_width != in_width {
                return Err(SparseError::ShapeMismatch(format!(
                    "stage {i} produces {out_width} outputs but stage {} expects {in_width} inputs",
                    i + 1
                )));
            }
        }

        let dims = stages.iter().map(|s| *s.dims()).collect();
        let image = SparseImage::from_parts(dims, stages.iter().flat_map(|s| s.entries()));
        tracing::debug!(
            stages = image.num_stages(),
            total_nnz = image.total_nnz(),
            "Built sparse stage group"
        );
        Ok(Self { image })
    }

    pub fn image(&self) -> &SparseImage {
        &self.image
    }

    pub fn into_image(self) -> SparseImage {
        self.image
    }

    pub fn len(&self) -> usize {
        self.image.num_stages()
    }

    pub fn is_empty(&self) -> bool {
        self.image.num_stages() == 0
    }

    /// Logical input width of the first stage.
    pub fn input_dim(&self) -> usize {
        self.image.stages().first().map_or(0, |s| s.k)
    }

    /// Logical output width of the last stage.
    pub fn output_dim(&self) -> usize {
        self.image.stages().last().map_or(0, |s| s.m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tile_core::{HardwareProfile, Matrix};

    fn formatter() -> SparseFormatter {
        let p = HardwareProfile::from_pairs([
            ("GEMX_ddrWidth", "4"),
            ("GEMX_uspmvInterleaves", "2"),
            ("GEMX_uspmvMvectorBlocks", "16"),
            ("GEMX_uspmvNnzVectorBlocks", "16"),
            ("GEMX_uspmvStages", "3"),
        ]);
        SparseFormatter::for_uspmv(&p).unwrap()
    }

    fn diag(m: usize, k: usize, value: f32) -> Matrix<f32> {
        Matrix::from_fn(m, k, |r, c| if r == c { value } else { 0.0 })
    }

    #[test]
    fn test_chain_concatenates() {
        let f = formatter();
        let a = f.format(&diag(10, 12, 1.0), 0.0).unwrap();
        let b = f.format(&diag(6, 10, 2.0), 1.0).unwrap();
        let group = StageGroup::build(&[a.clone(), b.clone()], &f, 3).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.input_dim(), 12);
        assert_eq!(group.output_dim(), 6);
        assert_eq!(
            group.image().total_nnz(),
            a.padded_nnz() + b.padded_nnz()
        );
        let (_, _, values) = group.image().stage_entries(1);
        assert_eq!(values, b.values());
    }

    #[test]
    fn test_broken_chain() {
        let f = formatter();
        let a = f.format(&diag(10, 12, 1.0), 0.0).unwrap();
        let b = f.format(&diag(6, 9, 1.0), 0.0).unwrap();
        assert!(matches!(
            StageGroup::build(&[a, b], &f, 3),
            Err(SparseError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_capacity_reported_before_chain() {
        let f = formatter();
        let a = f.format(&diag(10, 12, 1.0), 0.0).unwrap();
        // Formatted with a roomier engine, then grouped under the strict one.
        let wide = HardwareProfile::from_pairs([
            ("GEMX_ddrWidth", "4"),
            ("GEMX_uspmvInterleaves", "2"),
            ("GEMX_uspmvMvectorBlocks", "64"),
            ("GEMX_uspmvNnzVectorBlocks", "64"),
            ("GEMX_uspmvStages", "3"),
        ]);
        let big = SparseFormatter::for_uspmv(&wide)
            .unwrap()
            .format(&diag(100, 7, 1.0), 0.0)
            .unwrap();
        assert!(matches!(
            StageGroup::build(&[a, big], &f, 3),
            Err(SparseError::CapacityExceeded { what: "m", .. })
        ));
    }

    #[test]
    fn test_group_limits() {
        let f = formatter();
        assert!(matches!(
            StageGroup::build(&[], &f, 3),
            Err(SparseError::EmptyGroup)
        ));
        let s = f.format(&diag(8, 8, 1.0), 0.0).unwrap();
        let four = vec![s; 4];
        assert!(matches!(
            StageGroup::build(&four, &f, 3),
            Err(SparseError::CapacityExceeded { what: "stages", .. })
        ));
    }
}
