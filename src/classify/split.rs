use crate::classify::{Classify, ClassifyInput, Variant};
use crate::context::{Context, ContextKey, SessionOptions};
use crate::descriptor::{Mode, TensorDesc};
use crate::error::{ClassifyError, classify_bail};

/// Maximum number of pieces a split may produce.
pub const MAX_SPLIT_NUM: usize = 62;

/// Classification of split operators.
///
/// Inputs are the tensor being split and a list with one entry per output
/// piece, giving its size along the split axis if known.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SplitOptions {
    /// All pieces have the same size.
    pub avg_split: bool,
}

impl Classify for SplitOptions {
    fn classify(
        &self,
        inputs: &[ClassifyInput],
        _options: &SessionOptions,
        ctx: &mut Context,
    ) -> Result<Vec<Variant>, ClassifyError> {
        ctx.set(ContextKey::AvgSplit, self.avg_split);

        let [ClassifyInput::Tensor(shape), ClassifyInput::List(pieces)] = inputs else {
            classify_bail!(
                "split variable shape requires two input parameters: a shape tensor and a list of split sizes, but got {} inputs",
                inputs.len()
            );
        };

        let count = pieces.len();
        if !(1..=MAX_SPLIT_NUM).contains(&count) {
            classify_bail!(
                "split numbers error, split numbers must be in [1, {}], but got {}",
                MAX_SPLIT_NUM,
                count
            );
        }

        let mode = match shape.mode() {
            Mode::SplitGeneral => {
                match shape.split_factor() {
                    Some(factor) if factor >= 1 => {}
                    factor => classify_bail!(
                        "split_general mode requires a split factor of at least 1, got {:?}",
                        factor
                    ),
                }
                Mode::SplitGeneral
            }
            Mode::SplitSpecial => Mode::SplitSpecial,
            _ => Mode::Special,
        };

        let shape = shape.to_builder().mode(mode).build()?;
        let sizes = TensorDesc::values(pieces.iter().map(|p| p.unwrap_or(-1)).collect());

        Ok(vec![
            Variant::new(vec![shape, sizes], mode)
                .with_attr(ContextKey::AvgSplit, self.avg_split),
        ])
    }
}
