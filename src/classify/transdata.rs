use log::debug;

use crate::bound::Bound;
use crate::classify::{Classify, ClassifyInput, Variant, mode_for};
use crate::context::{Context, ContextKey, SessionOptions};
use crate::descriptor::TensorDesc;
use crate::error::{ClassifyError, classify_bail};
use crate::sym_expr::div_ceil;

/// Classification of layout transformations between plain and blocked
/// formats.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TransdataOptions {
    /// Pairs of `(source axes, destination axes)`.
    ///
    /// An entry with two destination axes splits a source axis into
    /// `(ceil(d / c0), c0)`. An entry with two source axes merges
    /// `(outer, c0)` into one destination axis.
    pub axes_map: Vec<(Vec<usize>, Vec<usize>)>,

    /// Block size.
    pub c0: i64,
}

impl Default for TransdataOptions {
    fn default() -> Self {
        TransdataOptions {
            axes_map: Vec::new(),
            c0: 16,
        }
    }
}

/// Direction of a transformation.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Direction {
    /// No axis is split or merged.
    Identity,
    /// Plain to blocked.
    Forward,
    /// Blocked to plain.
    Backward,
}

impl TransdataOptions {
    /// Check the axes map against a source of rank `ndim` and return the
    /// direction and destination rank.
    fn validate(&self, ndim: usize) -> Result<(Direction, usize), ClassifyError> {
        if self.c0 < 1 {
            classify_bail!("transdata block size must be at least 1, got {}", self.c0);
        }

        let mut seen_src = vec![false; ndim];
        let mut direction = Direction::Identity;
        let mut dst_ndim = 0;

        for (src, dst) in &self.axes_map {
            let entry = match (src.len(), dst.len()) {
                (1, 1) => Direction::Identity,
                (1, 2) => Direction::Forward,
                (2, 1) => Direction::Backward,
                _ => classify_bail!(
                    "transdata axes map entry {:?} -> {:?} must map one axis to one or two",
                    src,
                    dst
                ),
            };
            direction = match (direction, entry) {
                (Direction::Identity, entry) => entry,
                (dir, Direction::Identity) => dir,
                (a, b) if a == b => a,
                _ => classify_bail!("transdata axes map cannot both split and merge axes"),
            };

            for &axis in src {
                match seen_src.get_mut(axis) {
                    None => classify_bail!(
                        "transdata source axis {} out of range for rank {}",
                        axis,
                        ndim
                    ),
                    Some(true) => {
                        classify_bail!("transdata source axis {} appears more than once", axis)
                    }
                    Some(seen) => *seen = true,
                }
            }
            dst_ndim += dst.len();
        }

        if let Some(axis) = seen_src.iter().position(|seen| !seen) {
            classify_bail!("transdata axes map does not cover source axis {}", axis);
        }

        let mut seen_dst = vec![false; dst_ndim];
        for &axis in self.axes_map.iter().flat_map(|(_, dst)| dst) {
            match seen_dst.get_mut(axis) {
                None => classify_bail!(
                    "transdata destination axis {} out of range for rank {}",
                    axis,
                    dst_ndim
                ),
                Some(true) => {
                    classify_bail!("transdata destination axis {} appears more than once", axis)
                }
                Some(seen) => *seen = true,
            }
        }

        Ok((direction, dst_ndim))
    }

    /// Compute the destination descriptor for `src`.
    fn transform(&self, src: &TensorDesc, dst_ndim: usize) -> Result<TensorDesc, ClassifyError> {
        let c0 = self.c0;
        let mut dims = vec![(1, Bound::exact(1)); dst_ndim];

        for (src_axes, dst_axes) in &self.axes_map {
            match (src_axes.as_slice(), dst_axes.as_slice()) {
                (&[s], &[d]) => {
                    dims[d] = (src.static_dim(s).unwrap_or(-1), src.bound(s));
                }
                (&[s], &[outer, inner]) => {
                    let bound = src.bound(s);
                    let lo = div_ceil(bound.lo(), c0);
                    let hi = bound.hi().map(|hi| div_ceil(hi, c0));
                    let outer_bound = Bound::new(lo, hi)?;
                    dims[outer] = (outer_bound.is_exact().unwrap_or(-1), outer_bound);
                    dims[inner] = (c0, Bound::exact(c0));
                }
                (&[outer, inner], &[d]) => {
                    if src.static_dim(inner) != Some(c0) {
                        classify_bail!(
                            "merged inner axis {} must have size {}, got range {}",
                            inner,
                            c0,
                            src.bound(inner)
                        );
                    }
                    let bound = src.bound(outer).product(&Bound::exact(c0));
                    dims[d] = (bound.is_exact().unwrap_or(-1), bound);
                }
                _ => unreachable!("axes map was validated"),
            }
        }

        let (shape, bounds): (Vec<i64>, Vec<Bound>) = dims.into_iter().unzip();
        let dst = TensorDesc::builder(shape)
            .bounds(bounds)
            .dtype(src.dtype())
            .build()?;
        let mode = mode_for(&dst);
        Ok(dst.to_builder().mode(mode).build()?)
    }

    fn variant(&self, src: &TensorDesc, dst_ndim: usize) -> Result<Variant, ClassifyError> {
        let mode = mode_for(src);
        let src = src.to_builder().mode(mode).build()?;
        let dst = self.transform(&src, dst_ndim)?;
        Ok(Variant::new(vec![src, dst], mode)
            .with_attr(ContextKey::TransdataC0, self.c0)
            .with_attr(ContextKey::TransdataAxes, self.axes_map.clone()))
    }
}

impl Classify for TransdataOptions {
    fn classify(
        &self,
        inputs: &[ClassifyInput],
        _options: &SessionOptions,
        _ctx: &mut Context,
    ) -> Result<Vec<Variant>, ClassifyError> {
        let [ClassifyInput::Tensor(src)] = inputs else {
            classify_bail!("transdata requires exactly one input tensor, got {} inputs", inputs.len());
        };
        let (direction, dst_ndim) = self.validate(src.ndim())?;

        let mut variants = vec![self.variant(src, dst_ndim)?];

        if direction == Direction::Forward {
            // Split axes whose size may fit in a single block.
            let single_block: Vec<usize> = self
                .axes_map
                .iter()
                .filter(|(_, dst)| dst.len() == 2)
                .map(|(src_axes, _)| src_axes[0])
                .filter(|&axis| {
                    let bound = src.bound(axis);
                    src.static_dim(axis).is_none()
                        && bound.lo() <= self.c0
                        && bound.hi().is_none_or(|hi| hi > self.c0)
                })
                .collect();

            if !single_block.is_empty() {
                debug!("transdata single block axes {:?}", single_block);
                let mut bounds = src.range().to_vec();
                for &axis in &single_block {
                    bounds[axis] = bounds[axis].clamp_hi(self.c0)?;
                }
                let clamped = src.to_builder().bounds(bounds).build()?;
                variants.push(self.variant(&clamped, dst_ndim)?);
            }
        }

        Ok(variants)
    }
}

#[cfg(test)]
mod tests {
    use varshape_testing::TestCases;

    use super::TransdataOptions;
    use crate::bound::Bound;
    use crate::classify::{ClassifyInput, Pattern, Variant};
    use crate::context::{ClassificationSession, SessionOptions};
    use crate::descriptor::{Mode, TensorDesc};
    use crate::error::ClassifyError;
    use crate::test_util::tensor;

    fn transdata(
        src: TensorDesc,
        axes_map: Vec<(Vec<usize>, Vec<usize>)>,
    ) -> Result<Vec<Variant>, ClassifyError> {
        let mut session = ClassificationSession::enter(SessionOptions::default());
        session.classify(
            &[src.into()],
            &Pattern::Transdata(TransdataOptions {
                axes_map,
                c0: 16,
            }),
        )
    }

    fn nd_to_nc1hwc0() -> Vec<(Vec<usize>, Vec<usize>)> {
        vec![
            (vec![0], vec![0]),
            (vec![1], vec![1, 4]),
            (vec![2], vec![2]),
            (vec![3], vec![3]),
        ]
    }

    #[test]
    fn test_transdata_forward() {
        let src = tensor!(
            [2, -1, 7, 7],
            [(2, Some(2)), (1, Some(64)), (7, Some(7)), (7, Some(7))]
        );
        let variants = transdata(src, nd_to_nc1hwc0()).unwrap();
        assert_eq!(variants.len(), 2);

        let [_, dst] = variants[0].tensors() else {
            panic!("expected two tensors");
        };
        assert_eq!(dst.shape(), [2, -1, 7, 7, 16]);
        assert_eq!(dst.bound(1), Bound::new(1, Some(4)).unwrap());

        let [src, dst] = variants[1].tensors() else {
            panic!("expected two tensors");
        };
        assert_eq!(src.bound(1), Bound::new(1, Some(16)).unwrap());
        assert_eq!(dst.shape(), [2, 1, 7, 7, 16]);
        assert_eq!(
            variants[1].attrs().get("_transdata_c0").and_then(|v| v.as_int()),
            Some(16)
        );
    }

    #[test]
    fn test_transdata_forward_large_axis() {
        let src = tensor!([-1, -1], [(1, None), (32, None)]);
        let variants = transdata(src, vec![(vec![0], vec![0]), (vec![1], vec![1, 2])]).unwrap();

        // The split axis can never fit in one block.
        assert_eq!(variants.len(), 1);
        let dst = &variants[0].tensors()[1];
        assert_eq!(dst.shape(), [-1, -1, 16]);
        assert_eq!(dst.bound(1), Bound::at_least(2));
    }

    #[test]
    fn test_transdata_backward() {
        let src = tensor!([-1, -1, 16], [(1, Some(8)), (2, None), (16, Some(16))]);
        let variants =
            transdata(src, vec![(vec![0], vec![0]), (vec![1, 2], vec![1])]).unwrap();
        assert_eq!(variants.len(), 1);

        let dst = &variants[0].tensors()[1];
        assert_eq!(dst.shape(), [-1, -1]);
        assert_eq!(dst.bound(1), Bound::at_least(32));
        assert_eq!(dst.mode(), Mode::Special);
    }

    #[test]
    fn test_transdata_static() {
        let src = tensor!([2, 20]);
        let variants = transdata(src, vec![(vec![0], vec![0]), (vec![1], vec![1, 2])]).unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].mode(), Mode::Const);
        assert_eq!(variants[0].tensors()[1].shape(), [2, 2, 16]);
    }

    #[test]
    fn test_transdata_errors() {
        #[derive(Debug)]
        struct Case {
            axes_map: Vec<(Vec<usize>, Vec<usize>)>,
            expected: &'static str,
        }

        let cases = [
            Case {
                axes_map: vec![(vec![0], vec![0, 1]), (vec![1, 2], vec![2])],
                expected: "transdata axes map cannot both split and merge axes",
            },
            Case {
                axes_map: vec![(vec![0], vec![0]), (vec![1], vec![1])],
                expected: "transdata axes map does not cover source axis 2",
            },
            Case {
                axes_map: vec![(vec![0], vec![0]), (vec![0], vec![1]), (vec![2], vec![2])],
                expected: "transdata source axis 0 appears more than once",
            },
            Case {
                axes_map: vec![(vec![0], vec![0]), (vec![1], vec![1]), (vec![2], vec![5])],
                expected: "transdata destination axis 5 out of range for rank 3",
            },
            Case {
                axes_map: vec![(vec![0], vec![0]), (vec![1], vec![1]), (vec![3], vec![2])],
                expected: "transdata source axis 3 out of range for rank 3",
            },
        ];

        cases.test_each(|case| {
            let src = tensor!([-1, 4, 16], [(1, None), (4, Some(4)), (16, Some(16))]);
            let err = transdata(src, case.axes_map.clone()).err().unwrap();
            assert_eq!(
                err.to_string(),
                format!("classification error: {}", case.expected)
            );
        });
    }

    #[test]
    fn test_transdata_input_count() {
        let mut session = ClassificationSession::enter(SessionOptions::default());
        let x = tensor!([4]);
        let err = session
            .classify(
                &[ClassifyInput::from(x.clone()), x.into()],
                &Pattern::Transdata(TransdataOptions::default()),
            )
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "classification error: transdata requires exactly one input tensor, got 2 inputs"
        );
    }
}
