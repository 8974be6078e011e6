use log::debug;

use crate::bound::Bound;
use crate::classify::{Classify, ClassifyInput, Variant, tensor_inputs};
use crate::context::{Context, ContextKey, SessionOptions};
use crate::descriptor::{AxisKind, AxisPattern, Mode, TensorDesc};
use crate::error::{ClassifyError, classify_bail};

/// Classification of operators whose inputs are broadcast against each
/// other following NumPy rules.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BroadcastOptions {
    /// Kind of each axis of the aligned inputs, eg. `ABA`.
    ///
    /// If not set, the kinds come from the descriptors' patterns or are
    /// inferred from the shapes.
    pub pattern: Option<AxisPattern>,
}

impl BroadcastOptions {
    /// Return the axis kinds supplied by the options or the descriptors.
    fn annotation(
        &self,
        tensors: &[&TensorDesc],
        rank: usize,
    ) -> Result<Option<AxisPattern>, ClassifyError> {
        let mut found = self.pattern.clone();
        for desc in tensors {
            let Some(pattern) = desc.pattern() else {
                continue;
            };
            match &found {
                Some(prev) if prev != pattern => {
                    classify_bail!("conflicting axis patterns {} and {}", prev, pattern);
                }
                Some(_) => {}
                None => found = Some(pattern.clone()),
            }
        }
        if let Some(pattern) = &found
            && pattern.len() != rank
        {
            classify_bail!(
                "axis pattern {} does not match broadcast rank {}",
                pattern,
                rank
            );
        }
        Ok(found)
    }
}

impl Classify for BroadcastOptions {
    fn classify(
        &self,
        inputs: &[ClassifyInput],
        _options: &SessionOptions,
        ctx: &mut Context,
    ) -> Result<Vec<Variant>, ClassifyError> {
        ctx.set(ContextKey::SupportBroadcast, true);

        let tensors = tensor_inputs(inputs, "broadcast")?;
        let rank = tensors.iter().map(|t| t.ndim()).max().unwrap_or(0);
        let annotation = self.annotation(&tensors, rank)?;

        // Dims of each input, right-aligned and padded with leading 1s.
        let mut dims: Vec<Vec<(i64, Bound)>> = tensors
            .iter()
            .map(|desc| {
                let pad = rank - desc.ndim();
                std::iter::repeat_n((1, Bound::exact(1)), pad)
                    .chain((0..desc.ndim()).map(|axis| {
                        let bound = desc.bound(axis);
                        (desc.static_dim(axis).unwrap_or(-1), bound)
                    }))
                    .collect()
            })
            .collect();

        let mut kinds = Vec::with_capacity(rank);
        let mut ambiguous = Vec::new();
        for axis in 0..rank {
            let mut column: Vec<_> = dims.iter().map(|d| d[axis]).collect();
            let annotated = annotation.as_ref().map(|p| p.kinds()[axis]);
            let kind = resolve_column(axis, annotated, &mut column)?;

            if kind == AxisKind::Broadcast
                && column.len() >= 2
                && column.iter().all(|(dim, _)| *dim < 0)
            {
                ambiguous.push(axis);
            }
            for (input_dims, dim) in dims.iter_mut().zip(column) {
                input_dims[axis] = dim;
            }
            kinds.push(kind);
        }

        let axis_pattern = sharing_pattern(&kinds);
        let pattern = AxisPattern::new(kinds);
        debug!(
            "broadcast kinds {} sharing {} ambiguous axes {:?}",
            pattern, axis_pattern, ambiguous
        );

        let classified = tensors
            .iter()
            .zip(&dims)
            .map(|(desc, dims)| {
                let (shape, bounds): (Vec<i64>, Vec<Bound>) = dims.iter().copied().unzip();
                desc.to_builder()
                    .shape(shape)
                    .bounds(bounds)
                    .pattern(pattern.clone())
                    .mode(Mode::Special)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let broadcast_inputs: Vec<usize> = (0..tensors.len())
            .filter(|&input| ambiguous.iter().any(|&axis| dims[input][axis].0 < 0))
            .collect();

        let base = Variant::new(classified, Mode::Special)
            .with_attr(ContextKey::SupportBroadcast, true)
            .with_attr(ContextKey::AxisPattern, axis_pattern);
        if broadcast_inputs.is_empty() {
            return Ok(vec![base]);
        }

        Ok(broadcast_inputs
            .into_iter()
            .map(|input| {
                base.clone()
                    .with_attr(ContextKey::BroadcastInput, input as i64)
            })
            .collect())
    }
}

/// Decide the kind of one aligned axis and update the dims of each input on
/// that axis.
fn resolve_column(
    axis: usize,
    annotated: Option<AxisKind>,
    column: &mut [(i64, Bound)],
) -> Result<AxisKind, ClassifyError> {
    let mut sizes: Vec<i64> = column
        .iter()
        .filter(|(dim, _)| *dim >= 0)
        .map(|(dim, _)| *dim)
        .collect();
    sizes.sort();
    sizes.dedup();

    let has_one = sizes.contains(&1);
    let non_one: Vec<i64> = sizes.iter().copied().filter(|&s| s != 1).collect();
    if non_one.len() > 1 {
        classify_bail!("incompatible shapes for broadcast on axis {}", axis);
    }
    let all_dynamic = sizes.is_empty();

    // Fix dynamic dims on this axis to `size`.
    let force = |column: &mut [(i64, Bound)], size: i64| -> Result<(), ClassifyError> {
        for (dim, bound) in column.iter_mut().filter(|(dim, _)| *dim < 0) {
            if !bound.contains(size) {
                classify_bail!("incompatible shapes for broadcast on axis {}", axis);
            }
            *dim = size;
            *bound = Bound::exact(size);
        }
        Ok(())
    };

    let kind = match annotated {
        Some(AxisKind::Common) => {
            if has_one && !non_one.is_empty() {
                classify_bail!("incompatible shapes for broadcast on axis {}", axis);
            }
            if let Some(&size) = sizes.first() {
                force(column, size)?;
            } else {
                intersect_column(column)?;
            }
            AxisKind::Common
        }
        Some(AxisKind::Broadcast) => {
            if all_dynamic {
                widen(column);
            }
            AxisKind::Broadcast
        }
        None if !non_one.is_empty() => {
            force(column, non_one[0])?;
            if has_one {
                AxisKind::Broadcast
            } else {
                AxisKind::Common
            }
        }
        None if has_one => {
            if column.iter().all(|(dim, _)| *dim >= 0) {
                AxisKind::Common
            } else {
                AxisKind::Broadcast
            }
        }
        None => {
            if column.len() < 2 || column.iter().all(|(_, bound)| !bound.may_be_one()) {
                intersect_column(column)?;
                AxisKind::Common
            } else {
                widen(column);
                AxisKind::Broadcast
            }
        }
    };
    Ok(kind)
}

/// Give co-varying dynamic dims the intersection of their ranges.
///
/// A dim whose intersected range holds a single size becomes static.
fn intersect_column(column: &mut [(i64, Bound)]) -> Result<(), ClassifyError> {
    let mut bounds = column.iter().map(|(_, bound)| *bound);
    let Some(mut acc) = bounds.next() else {
        return Ok(());
    };
    for bound in bounds {
        acc = acc.intersect(&bound)?;
    }
    let size = acc.is_exact().unwrap_or(-1);
    for (dim, bound) in column.iter_mut().filter(|(dim, _)| *dim < 0) {
        *dim = size;
        *bound = acc;
    }
    Ok(())
}

/// Give every dynamic dim on an axis where any input may be broadcast the
/// widest range, since the other inputs no longer constrain it.
fn widen(column: &mut [(i64, Bound)]) {
    for (_, bound) in column.iter_mut() {
        *bound = Bound::unbounded_like();
    }
}

/// Return the `_axis_pattern` string for the given axis kinds.
///
/// An axis gets `S` (one variable shared by all inputs) if it is a common
/// axis and so is every axis after it. All other axes get `I` (one variable
/// per input).
fn sharing_pattern(kinds: &[AxisKind]) -> String {
    let mut pattern: Vec<char> = Vec::with_capacity(kinds.len());
    let mut suffix_common = true;
    for kind in kinds.iter().rev() {
        suffix_common &= *kind == AxisKind::Common;
        pattern.push(if suffix_common { 'S' } else { 'I' });
    }
    pattern.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use varshape_testing::TestCases;

    use super::{BroadcastOptions, sharing_pattern};
    use crate::bound::{Bound, INT32_MAX};
    use crate::classify::{ClassifyInput, Pattern};
    use crate::context::{ClassificationSession, ContextKey, SessionOptions};
    use crate::descriptor::{AxisKind, Mode, TensorDesc};
    use crate::test_util::tensor;

    fn aba_inputs() -> Vec<ClassifyInput> {
        let x = tensor!(
            [-1, -1, -1],
            [(1, Some(256)), (1, None), (100, Some(512))]
        );
        vec![x.clone().into(), x.into()]
    }

    #[test]
    fn test_sharing_pattern() {
        use AxisKind::{Broadcast as B, Common as A};
        assert_eq!(sharing_pattern(&[A, B, A]), "IIS");
        assert_eq!(sharing_pattern(&[A, A]), "SS");
        assert_eq!(sharing_pattern(&[B, A, A]), "ISS");
        assert_eq!(sharing_pattern(&[A, A, B]), "III");
        assert_eq!(sharing_pattern(&[]), "");
    }

    #[test]
    fn test_broadcast_common_axis_intersects_ranges() {
        #[derive(Debug)]
        struct Case {
            inputs: [TensorDesc; 2],
            shape: Vec<i64>,
            range: Vec<Bound>,
        }

        let cases = [
            Case {
                inputs: [
                    tensor!([-1], [(2, None)]),
                    tensor!([-1], [(3, Some(10))]),
                ],
                shape: vec![-1],
                range: vec![Bound::new(3, Some(10)).unwrap()],
            },
            Case {
                inputs: [
                    tensor!([-1], [(3, Some(10))]),
                    tensor!([-1], [(2, None)]),
                ],
                shape: vec![-1],
                range: vec![Bound::new(3, Some(10)).unwrap()],
            },
            Case {
                inputs: [
                    tensor!([-1], [(2, Some(8))]),
                    tensor!([-1], [(8, None)]),
                ],
                shape: vec![8],
                range: vec![Bound::exact(8)],
            },
        ];

        cases.test_each(|case| {
            let [x, y] = case.inputs.clone();
            let mut session = ClassificationSession::enter(SessionOptions::default());
            let variants = session
                .classify(&[ClassifyInput::from(x), y.into()], &Pattern::broadcast())
                .unwrap();
            assert_eq!(variants.len(), 1);
            for desc in variants[0].tensors() {
                assert_eq!(desc.shape(), case.shape);
                assert_eq!(desc.range(), case.range);
            }
        });
    }

    #[test]
    fn test_broadcast_aba() {
        let pattern = Pattern::Broadcast(BroadcastOptions {
            pattern: Some("ABA".parse().unwrap()),
        });
        let mut session = ClassificationSession::enter(SessionOptions::default());
        let variants = session.classify(&aba_inputs(), &pattern).unwrap();

        assert_eq!(variants.len(), 2);
        for (i, variant) in variants.iter().enumerate() {
            assert_eq!(variant.mode(), Mode::Special);
            assert_eq!(
                variant.attrs().get("_broadcast_input").and_then(|v| v.as_int()),
                Some(i as i64)
            );
            assert_eq!(
                variant.attrs().get("_axis_pattern").and_then(|v| v.as_str()),
                Some("IIS")
            );
            for desc in variant.tensors() {
                assert_eq!(
                    desc.range(),
                    [
                        Bound::new(1, Some(256)).unwrap(),
                        Bound::new(1, Some(INT32_MAX)).unwrap(),
                        Bound::new(100, Some(512)).unwrap(),
                    ]
                );
            }
        }

        let ctx = session.exit();
        assert_eq!(ctx.get("_support_broadcast").and_then(|v| v.as_bool()), Some(true));
        assert_eq!(ctx.get("_pattern").and_then(|v| v.as_str()), Some("broadcast"));
        assert_eq!(ctx.get("_mode").and_then(|v| v.as_str()), Some("special"));
    }

    #[test]
    fn test_broadcast_descriptor_pattern() {
        let x = tensor!(
            [-1, -1, -1],
            [(1, Some(256)), (1, None), (100, Some(512))]
        );
        let x = x.to_builder().pattern("ABA".parse().unwrap()).build().unwrap();
        let y = tensor!(
            [-1, -1, -1],
            [(1, Some(256)), (1, None), (100, Some(512))]
        );

        let mut session = ClassificationSession::enter(SessionOptions::default());
        let variants = session
            .classify(&[ClassifyInput::from(x), y.into()], &Pattern::broadcast())
            .unwrap();
        assert_eq!(variants.len(), 2);
    }

    #[test]
    fn test_broadcast_inferred() {
        #[derive(Debug)]
        struct Case {
            inputs: Vec<TensorDesc>,
            kinds: &'static str,
            sharing: &'static str,
            variants: usize,
            first_shape: Vec<i64>,
        }

        let cases = [
            Case {
                inputs: vec![tensor!([2, 3]), tensor!([2, 3])],
                kinds: "AA",
                sharing: "SS",
                variants: 1,
                first_shape: vec![2, 3],
            },
            Case {
                inputs: vec![
                    tensor!([1, -1], [(1, Some(1)), (1, None)]),
                    tensor!([5, -1], [(5, Some(5)), (1, None)]),
                ],
                kinds: "BB",
                sharing: "II",
                variants: 2,
                first_shape: vec![1, -1],
            },
            Case {
                inputs: vec![
                    tensor!([-1], [(2, None)]),
                    tensor!([-1], [(3, Some(10))]),
                ],
                kinds: "A",
                sharing: "S",
                variants: 1,
                first_shape: vec![-1],
            },
            Case {
                inputs: vec![
                    tensor!([4, -1], [(4, Some(4)), (1, Some(8))]),
                    tensor!([-1], [(1, None)]),
                ],
                kinds: "BB",
                sharing: "II",
                variants: 2,
                first_shape: vec![4, -1],
            },
            Case {
                inputs: vec![tensor!([-1], [(1, None)]), tensor!([16])],
                kinds: "A",
                sharing: "S",
                variants: 1,
                first_shape: vec![16],
            },
            Case {
                inputs: vec![tensor!([-1, 8], [(1, None), (8, Some(8))]), tensor!([8])],
                kinds: "BA",
                sharing: "IS",
                variants: 1,
                first_shape: vec![-1, 8],
            },
        ];

        cases.test_each(|case| {
            let inputs: Vec<ClassifyInput> = case.inputs.iter().cloned().map(Into::into).collect();
            let mut session = ClassificationSession::enter(SessionOptions::default());
            let variants = session.classify(&inputs, &Pattern::broadcast()).unwrap();

            assert_eq!(variants.len(), case.variants);
            let first = &variants[0];
            let kinds = first.tensors()[0].pattern().map(|p| p.to_string());
            assert_eq!(kinds.as_deref(), Some(case.kinds));
            assert_eq!(
                first.attrs().get("_axis_pattern").and_then(|v| v.as_str()),
                Some(case.sharing)
            );
            assert_eq!(first.tensors()[0].shape(), case.first_shape);
            for variant in &variants {
                let rank = variant.tensors()[0].ndim();
                assert!(variant.tensors().iter().all(|t| t.ndim() == rank));
            }
        });
    }

    #[test]
    fn test_broadcast_padding() {
        let mut session = ClassificationSession::enter(SessionOptions::default());
        let variants = session
            .classify(
                &[
                    ClassifyInput::from(tensor!([-1, 8], [(2, None), (8, Some(8))])),
                    tensor!([8]).into(),
                ],
                &Pattern::broadcast(),
            )
            .unwrap();
        let padded = &variants[0].tensors()[1];
        assert_eq!(padded.shape(), [1, 8]);
        assert_eq!(padded.pattern().map(|p| p.to_string()).as_deref(), Some("BA"));
        assert!(!variants[0].attrs().contains(ContextKey::BroadcastInput));
    }

    #[test]
    fn test_broadcast_errors() {
        #[derive(Debug)]
        struct Case {
            inputs: Vec<TensorDesc>,
            pattern: Option<&'static str>,
            expected: &'static str,
        }

        let cases = [
            Case {
                inputs: vec![tensor!([2]), tensor!([3])],
                pattern: None,
                expected: "incompatible shapes for broadcast on axis 0",
            },
            Case {
                inputs: vec![tensor!([-1], [(1, Some(8))]), tensor!([16])],
                pattern: None,
                expected: "incompatible shapes for broadcast on axis 0",
            },
            Case {
                inputs: vec![tensor!([-1], [(1, None)]), tensor!([-1], [(1, None)])],
                pattern: Some("AB"),
                expected: "axis pattern AB does not match broadcast rank 1",
            },
            Case {
                inputs: vec![tensor!([1]), tensor!([4])],
                pattern: Some("A"),
                expected: "incompatible shapes for broadcast on axis 0",
            },
        ];

        cases.test_each(|case| {
            let inputs: Vec<ClassifyInput> = case.inputs.iter().cloned().map(Into::into).collect();
            let pattern = Pattern::Broadcast(BroadcastOptions {
                pattern: case.pattern.map(|p| p.parse().unwrap()),
            });
            let mut session = ClassificationSession::enter(SessionOptions::default());
            let err = session.classify(&inputs, &pattern).err().unwrap();
            assert_eq!(
                err.to_string(),
                format!("classification error: {}", case.expected)
            );
        });
    }

    #[test]
    fn test_broadcast_conflicting_patterns() {
        let x = tensor!([-1], [(1, None)])
            .to_builder()
            .pattern("A".parse().unwrap())
            .build()
            .unwrap();
        let y = tensor!([-1], [(1, None)])
            .to_builder()
            .pattern("B".parse().unwrap())
            .build()
            .unwrap();

        let mut session = ClassificationSession::enter(SessionOptions::default());
        let err = session
            .classify(&[ClassifyInput::from(x), y.into()], &Pattern::broadcast())
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "classification error: conflicting axis patterns A and B"
        );
    }
}
