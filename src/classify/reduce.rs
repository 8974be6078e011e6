use log::debug;
use smallvec::SmallVec;

use crate::bound::Bound;
use crate::classify::{
    Classify, ClassifyInput, Variant, axis_values, mode_for, resolve_axes,
};
use crate::context::{Context, ContextKey, SessionOptions};
use crate::descriptor::{Format, RelPos, TensorDesc};
use crate::error::{ClassificationError, ClassifyError, classify_bail};

type Axes = SmallVec<[usize; 4]>;

/// Classification of reductions.
///
/// Inputs are a data tensor and an axis input, which is either a descriptor
/// created with [`TensorDesc::axes`] or a list of axes. One variant is
/// produced per set of reduce axes.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReduceOptions {
    /// Keep reduced axes as size-1 axes in the output.
    pub keepdims: bool,

    /// Treat axes as indexes into the data's own layout even if it is a
    /// blocked format.
    pub ignore_fractal_format: bool,
}

impl Classify for ReduceOptions {
    fn classify(
        &self,
        inputs: &[ClassifyInput],
        options: &SessionOptions,
        _ctx: &mut Context,
    ) -> Result<Vec<Variant>, ClassifyError> {
        if inputs.len() != 2 {
            classify_bail!(
                "reduce requires a data tensor and an axis input, got {} inputs",
                inputs.len()
            );
        }
        let axis_slot = if inputs[1].is_axis() {
            1
        } else if inputs[0].is_axis() {
            0
        } else {
            classify_bail!("reduce requires an axis input");
        };
        let data_slot = 1 - axis_slot;
        let Some(data) = inputs[data_slot].as_tensor() else {
            classify_bail!("reduce data input must be a tensor");
        };

        let layout = AxisLayout::of(data, self.ignore_fractal_format);
        let axis_sets: Vec<Axes> = match axis_values(&inputs[axis_slot])? {
            Some(values) => vec![layout.resolve(&values)?],
            None => {
                let max_len = inputs[axis_slot]
                    .as_tensor()
                    .and_then(|desc| desc.static_dim(0))
                    .map(|len| len as usize);
                enumerate_axis_sets(layout.ndim(), max_len, options.max_axis_variants)?
                    .iter()
                    .map(|set| layout.remap(set))
                    .collect()
            }
        };

        let mut variants = Vec::with_capacity(axis_sets.len());
        for axes in axis_sets {
            let (shape, bounds, reduce_axes) = if options.fuse_axes {
                fuse_axes(data, &axes)
            } else {
                let shape = (0..data.ndim())
                    .map(|axis| data.static_dim(axis).unwrap_or(-1))
                    .collect();
                let reduce_axes = axes.iter().map(|&a| a as i64).collect();
                (shape, data.range().to_vec(), reduce_axes)
            };
            debug!(
                "reduce axes {:?} -> shape {:?} reduce axes {:?}",
                axes, shape, reduce_axes
            );

            let mut builder = TensorDesc::builder(shape)
                .bounds(bounds)
                .dtype(data.dtype())
                .rel_pos_to_reduce(RelPos::Before);
            if !options.fuse_axes {
                builder = builder.format(data.format()).ori_format(data.ori_format());
            }
            let data_desc = builder.build()?;
            let mode = mode_for(&data_desc);
            let data_desc = data_desc.to_builder().mode(mode).build()?;
            let axis_desc = TensorDesc::axes(reduce_axes.clone());

            let tensors = if data_slot == 0 {
                vec![data_desc, axis_desc]
            } else {
                vec![axis_desc, data_desc]
            };
            variants.push(
                Variant::new(tensors, mode)
                    .with_attr(ContextKey::Keepdims, self.keepdims)
                    .with_attr(ContextKey::ReduceAxes, reduce_axes),
            );
        }

        Ok(variants)
    }
}

/// Maps the axes a reduction is specified against onto the axes of the data
/// tensor.
///
/// For blocked formats the axes are given in terms of the original format,
/// and one original axis can correspond to two blocked axes.
#[derive(Clone, Copy, Debug, PartialEq)]
enum AxisLayout {
    Plain { ndim: usize },
    /// `NC1HWC0` data with axes given against `NCHW` or `NHWC`.
    Nc1hwc0 { channels_last: bool },
    /// `FRACTAL_NZ` data of rank `ndim` with axes against its `ND` shape.
    FractalNz { ndim: usize },
}

impl AxisLayout {
    fn of(data: &TensorDesc, ignore_fractal_format: bool) -> AxisLayout {
        let ndim = data.ndim();
        if ignore_fractal_format {
            return AxisLayout::Plain { ndim };
        }
        match (data.format(), data.ori_format()) {
            (Format::Nc1hwc0, Format::Nchw) if ndim == 5 => AxisLayout::Nc1hwc0 {
                channels_last: false,
            },
            (Format::Nc1hwc0, Format::Nhwc) if ndim == 5 => AxisLayout::Nc1hwc0 {
                channels_last: true,
            },
            (Format::FractalNz, ori) if ori != Format::FractalNz && ndim >= 4 => {
                AxisLayout::FractalNz { ndim }
            }
            _ => AxisLayout::Plain { ndim },
        }
    }

    /// Rank of the shape that axes are specified against.
    fn ndim(&self) -> usize {
        match *self {
            Self::Plain { ndim } => ndim,
            Self::Nc1hwc0 { .. } => 4,
            Self::FractalNz { ndim } => ndim - 2,
        }
    }

    /// Resolve axis values against the original shape and map them to data
    /// axes.
    fn resolve(&self, values: &[i64]) -> Result<Axes, ClassifyError> {
        let axes = resolve_axes(self.ndim(), values)?;
        Ok(self.remap(&axes))
    }

    /// Map resolved original axes to sorted data axes.
    fn remap(&self, axes: &[usize]) -> Axes {
        let mut mapped = Axes::new();
        for &axis in axes {
            match *self {
                Self::Plain { .. } => mapped.push(axis),
                Self::Nc1hwc0 { channels_last } => {
                    let c_axis = if channels_last { 3 } else { 1 };
                    match axis {
                        a if a == c_axis => mapped.extend([1, 4]),
                        0 => mapped.push(0),
                        a if channels_last => mapped.push(a + 1),
                        a => mapped.push(a),
                    }
                }
                Self::FractalNz { ndim } => {
                    let ori_ndim = ndim - 2;
                    if axis + 1 == ori_ndim {
                        mapped.extend([ndim - 4, ndim - 1]);
                    } else if axis + 2 == ori_ndim {
                        mapped.extend([ndim - 3, ndim - 2]);
                    } else {
                        mapped.push(axis);
                    }
                }
            }
        }
        mapped.sort();
        mapped.dedup();
        mapped
    }
}

/// Enumerate all non-empty sets of axes of a tensor with `ndim` dimensions,
/// in ascending bitmask order.
///
/// If `max_len` is set, only sets with at most that many axes are returned.
/// The number of sets is checked against `limit` before any are built.
fn enumerate_axis_sets(
    ndim: usize,
    max_len: Option<usize>,
    limit: usize,
) -> Result<Vec<Axes>, ClassifyError> {
    let max_len = max_len.unwrap_or(ndim).min(ndim);
    let count = count_axis_sets(ndim, max_len);
    if count > limit as u64 {
        return Err(ClassificationError::new(format!(
            "reduce axis enumeration needs {} variants, more than the limit of {}",
            count, limit
        ))
        .into());
    }

    // Sets whose highest axis is `axis` follow all sets of lower axes, which
    // gives ascending bitmask order.
    let mut sets: Vec<Axes> = Vec::with_capacity(count as usize);
    for axis in 0..ndim {
        let prev_len = sets.len();
        sets.push(Axes::from_slice(&[axis]));
        for i in 0..prev_len {
            if sets[i].len() < max_len {
                let mut set = sets[i].clone();
                set.push(axis);
                sets.push(set);
            }
        }
    }
    Ok(sets)
}

/// Number of non-empty sets of at most `max_len` axes out of `ndim`,
/// saturating at `u64::MAX`.
fn count_axis_sets(ndim: usize, max_len: usize) -> u64 {
    let mut total: u64 = 0;
    // C(ndim, k), starting from k = 0.
    let mut binomial: u128 = 1;
    for k in 1..=max_len {
        binomial = binomial * (ndim - k + 1) as u128 / k as u128;
        let Ok(term) = u64::try_from(binomial) else {
            return u64::MAX;
        };
        total = total.saturating_add(term);
    }
    total
}

/// Drop size-1 axes and fuse adjacent axes which are both reduced or both
/// kept.
///
/// Returns the fused shape, its ranges and the reduce axes of the fused
/// shape.
fn fuse_axes(data: &TensorDesc, axes: &[usize]) -> (Vec<i64>, Vec<Bound>, Vec<i64>) {
    // (is reduce axis, range of fused size)
    let mut groups: Vec<(bool, Bound)> = Vec::new();
    for axis in 0..data.ndim() {
        if data.static_dim(axis) == Some(1) {
            continue;
        }
        let is_reduce = axes.contains(&axis);
        let bound = data.bound(axis);
        match groups.last_mut() {
            Some((reduce, fused)) if *reduce == is_reduce => *fused = fused.product(&bound),
            _ => groups.push((is_reduce, bound)),
        }
    }

    if groups.is_empty() {
        let reduce_axes = if axes.is_empty() { vec![] } else { vec![0] };
        return (vec![1], vec![Bound::exact(1)], reduce_axes);
    }

    let shape = groups
        .iter()
        .map(|(_, bound)| bound.is_exact().unwrap_or(-1))
        .collect();
    let bounds = groups.iter().map(|(_, bound)| *bound).collect();
    let reduce_axes = groups
        .iter()
        .enumerate()
        .filter(|(_, (reduce, _))| *reduce)
        .map(|(i, _)| i as i64)
        .collect();
    (shape, bounds, reduce_axes)
}

#[cfg(test)]
mod tests {
    use varshape_testing::TestCases;

    use super::{ReduceOptions, enumerate_axis_sets};
    use crate::bound::Bound;
    use crate::classify::{ClassifyInput, Pattern, Variant};
    use crate::context::{ClassificationSession, SessionOptions};
    use crate::descriptor::{Format, Mode, TensorDesc};
    use crate::error::ClassifyError;
    use crate::test_util::tensor;

    fn reduce(
        data: TensorDesc,
        axes: ClassifyInput,
        opts: ReduceOptions,
        session_opts: SessionOptions,
    ) -> Result<Vec<Variant>, ClassifyError> {
        let mut session = ClassificationSession::enter(session_opts);
        session.classify(&[data.into(), axes], &Pattern::Reduce(opts))
    }

    fn unfused() -> SessionOptions {
        SessionOptions {
            fuse_axes: false,
            ..Default::default()
        }
    }

    fn reduce_axes(variant: &Variant) -> Vec<i64> {
        variant
            .attrs()
            .get("_reduce_axes")
            .and_then(|v| v.as_shape())
            .map(|axes| axes.to_vec())
            .unwrap_or_default()
    }

    #[test]
    fn test_reduce_known_axes() {
        #[derive(Debug)]
        struct Case {
            data: TensorDesc,
            axes: Vec<i64>,
            fuse_axes: bool,
            shape: Vec<i64>,
            reduce_axes: Vec<i64>,
        }

        let cases = [
            Case {
                data: tensor!([-1, -1, 16], [(1, None), (1, None), (16, Some(16))]),
                axes: vec![1],
                fuse_axes: true,
                shape: vec![-1, -1, 16],
                reduce_axes: vec![1],
            },
            Case {
                data: tensor!([2, -1, 1, 4], [(2, Some(2)), (1, Some(8)), (1, Some(1)), (4, Some(4))]),
                axes: vec![2, 3],
                fuse_axes: true,
                shape: vec![-1, 4],
                reduce_axes: vec![1],
            },
            Case {
                data: tensor!([2, -1, 1, 4], [(2, Some(2)), (1, Some(8)), (1, Some(1)), (4, Some(4))]),
                axes: vec![2, 3],
                fuse_axes: false,
                shape: vec![2, -1, 1, 4],
                reduce_axes: vec![2, 3],
            },
            Case {
                data: tensor!([-1, 3, 5], [(1, None), (3, Some(3)), (5, Some(5))]),
                axes: vec![-1, -2, 2],
                fuse_axes: true,
                shape: vec![-1, 15],
                reduce_axes: vec![1],
            },
            Case {
                data: tensor!([1, 1]),
                axes: vec![0],
                fuse_axes: true,
                shape: vec![1],
                reduce_axes: vec![0],
            },
        ];

        cases.test_each(|case| {
            let session_opts = SessionOptions {
                fuse_axes: case.fuse_axes,
                ..Default::default()
            };
            let variants = reduce(
                case.data.clone(),
                TensorDesc::axes(case.axes.clone()).into(),
                ReduceOptions::default(),
                session_opts,
            )
            .unwrap();
            assert_eq!(variants.len(), 1);
            let [data, axes] = variants[0].tensors() else {
                panic!("expected two tensors");
            };
            assert_eq!(data.shape(), case.shape);
            assert_eq!(axes.value(), Some(case.reduce_axes.as_slice()));
            assert_eq!(reduce_axes(&variants[0]), case.reduce_axes);
        });
    }

    #[test]
    fn test_reduce_fused_range() {
        let data = tensor!([2, -1, 1, 4], [(2, Some(2)), (1, Some(8)), (1, Some(1)), (4, Some(4))]);
        let variants = reduce(
            data,
            ClassifyInput::List(vec![Some(2), Some(3)]),
            ReduceOptions {
                keepdims: true,
                ..Default::default()
            },
            SessionOptions::default(),
        )
        .unwrap();

        let data = &variants[0].tensors()[0];
        assert_eq!(
            data.range(),
            [Bound::new(2, Some(16)).unwrap(), Bound::exact(4)]
        );
        assert_eq!(data.mode(), Mode::Special);
        assert_eq!(
            variants[0].attrs().get("_keepdims").and_then(|v| v.as_bool()),
            Some(true)
        );
    }

    #[test]
    fn test_reduce_axis_slot_first() {
        let data = tensor!([-1, 8], [(1, None), (8, Some(8))]);
        let mut session = ClassificationSession::enter(unfused());
        let variants = session
            .classify(
                &[ClassifyInput::from(TensorDesc::axes(vec![0])), data.into()],
                &Pattern::Reduce(ReduceOptions::default()),
            )
            .unwrap();
        let tensors = variants[0].tensors();
        assert_eq!(tensors[0].value(), Some([0].as_slice()));
        assert_eq!(tensors[1].shape(), [-1, 8]);
    }

    #[test]
    fn test_reduce_unknown_axes() {
        let data = tensor!([-1, -1], [(1, None), (1, None)]);
        let variants = reduce(
            data.clone(),
            TensorDesc::axes_unknown(2).into(),
            ReduceOptions::default(),
            unfused(),
        )
        .unwrap();
        let sets: Vec<_> = variants.iter().map(reduce_axes).collect();
        assert_eq!(sets, [vec![0], vec![1], vec![0, 1]]);

        let variants = reduce(
            data,
            TensorDesc::axes_unknown(1).into(),
            ReduceOptions::default(),
            unfused(),
        )
        .unwrap();
        let sets: Vec<_> = variants.iter().map(reduce_axes).collect();
        assert_eq!(sets, [vec![0], vec![1]]);
    }

    #[test]
    fn test_enumerate_axis_sets_limit() {
        assert_eq!(enumerate_axis_sets(3, None, 256).unwrap().len(), 7);
        assert_eq!(enumerate_axis_sets(3, Some(1), 256).unwrap().len(), 3);
        let err = enumerate_axis_sets(3, None, 4).unwrap_err();
        assert_eq!(
            err.to_string(),
            "classification error: reduce axis enumeration needs 7 variants, more than the limit of 4"
        );

        let sets = enumerate_axis_sets(3, None, 256).unwrap();
        let sets: Vec<Vec<usize>> = sets.iter().map(|set| set.to_vec()).collect();
        assert_eq!(
            sets,
            [
                vec![0],
                vec![1],
                vec![0, 1],
                vec![2],
                vec![0, 2],
                vec![1, 2],
                vec![0, 1, 2]
            ]
        );
    }

    #[test]
    fn test_enumerate_axis_sets_high_rank() {
        // Rejected from the count alone, without visiting each subset.
        let err = enumerate_axis_sets(40, None, 256).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "classification error: reduce axis enumeration needs {} variants, more than the limit of 256",
                (1u64 << 40) - 1
            )
        );

        // Short sets of a high-rank tensor stay within the limit.
        let sets = enumerate_axis_sets(100, Some(1), 256).unwrap();
        assert_eq!(sets.len(), 100);
        assert_eq!(sets[99].as_slice(), &[99]);
    }

    #[test]
    fn test_reduce_fractal_formats() {
        #[derive(Debug)]
        struct Case {
            data: TensorDesc,
            axes: Vec<i64>,
            ignore_fractal_format: bool,
            expected: Vec<i64>,
        }

        let nc1hwc0 = |ori: Format| {
            tensor!([-1, -1, -1, -1, 16], [(1, None), (1, None), (1, None), (1, None), (16, Some(16))])
                .to_builder()
                .format(Format::Nc1hwc0)
                .ori_format(ori)
                .build()
                .unwrap()
        };
        let nz = tensor!([-1, -1, 16, 16], [(1, None), (1, None), (16, Some(16)), (16, Some(16))])
            .to_builder()
            .format(Format::FractalNz)
            .ori_format(Format::Nd)
            .build()
            .unwrap();

        let cases = [
            Case {
                data: nc1hwc0(Format::Nchw),
                axes: vec![1],
                ignore_fractal_format: false,
                expected: vec![1, 4],
            },
            Case {
                data: nc1hwc0(Format::Nchw),
                axes: vec![2, 3],
                ignore_fractal_format: false,
                expected: vec![2, 3],
            },
            Case {
                data: nc1hwc0(Format::Nhwc),
                axes: vec![3],
                ignore_fractal_format: false,
                expected: vec![1, 4],
            },
            Case {
                data: nc1hwc0(Format::Nhwc),
                axes: vec![1],
                ignore_fractal_format: false,
                expected: vec![2],
            },
            Case {
                data: nc1hwc0(Format::Nchw),
                axes: vec![1],
                ignore_fractal_format: true,
                expected: vec![1],
            },
            Case {
                data: nz.clone(),
                axes: vec![-1],
                ignore_fractal_format: false,
                expected: vec![0, 3],
            },
            Case {
                data: nz,
                axes: vec![0],
                ignore_fractal_format: false,
                expected: vec![1, 2],
            },
        ];

        cases.test_each(|case| {
            let variants = reduce(
                case.data.clone(),
                TensorDesc::axes(case.axes.clone()).into(),
                ReduceOptions {
                    keepdims: false,
                    ignore_fractal_format: case.ignore_fractal_format,
                },
                unfused(),
            )
            .unwrap();
            assert_eq!(reduce_axes(&variants[0]), case.expected);
        });
    }

    #[test]
    fn test_reduce_errors() {
        let data = tensor!([-1, 4], [(1, None), (4, Some(4))]);

        #[derive(Debug)]
        struct Case {
            inputs: Vec<ClassifyInput>,
            expected: &'static str,
        }

        let cases = [
            Case {
                inputs: vec![data.clone().into(), ClassifyInput::List(vec![Some(0), None])],
                expected: "reduce axis must not be None",
            },
            Case {
                inputs: vec![data.clone().into(), ClassifyInput::List(vec![Some(2)])],
                expected: "axis out of range: 2 for rank 2",
            },
            Case {
                inputs: vec![data.clone().into()],
                expected: "reduce requires a data tensor and an axis input, got 1 inputs",
            },
            Case {
                inputs: vec![data.clone().into(), data.clone().into()],
                expected: "reduce requires an axis input",
            },
        ];

        cases.test_each(|case| {
            let mut session = ClassificationSession::enter(SessionOptions::default());
            let err = session
                .classify(&case.inputs, &Pattern::Reduce(ReduceOptions::default()))
                .err()
                .unwrap();
            assert_eq!(
                err.to_string(),
                format!("classification error: {}", case.expected)
            );
        });
    }
}
