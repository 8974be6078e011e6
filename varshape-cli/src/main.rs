use std::collections::VecDeque;
use std::error::Error;
use std::fs;

use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use varshape::{ClassificationSession, ClassifyInput, OpMode, Pattern, SessionOptions, Variant};

struct Args {
    /// JSON file containing the classification request.
    request: String,

    /// Enable debug logging and log each variant.
    verbose: bool,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut values = VecDeque::new();
    let mut verbose = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Value(val) => values.push_back(val.string()?),
            Short('v') | Long("verbose") => verbose = true,
            Short('h') | Long("help") => {
                println!(
                    "Classify dynamic shapes and print the variable shape of each variant.

Usage: {bin_name} [OPTIONS] <request>

The request is a JSON file such as:

  {{\"pattern\": \"reduce\", \"options\": {{\"keepdims\": true}},
   \"inputs\": [{{\"shape\": [-1, 16], \"range\": [[1, null], [16, 16]]}}, [1]]}}

  -v, --verbose  Enable verbose logging
  -h, --help     Print help

Classification options can also be set with the VARSHAPE_OPTIONS env var,
eg. VARSHAPE_OPTIONS=\"fuse-axes=0 max-axis-variants=64\".
",
                    bin_name = parser.bin_name().unwrap_or("varshape")
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let request = values.pop_front().ok_or("missing `<request>` arg")?;

    Ok(Args { request, verbose })
}

/// A classification request read from JSON.
#[derive(Debug, Deserialize)]
struct Request {
    pattern: String,

    /// Options for the pattern. Defaults are used if absent.
    #[serde(default)]
    options: Option<serde_json::Value>,

    inputs: Vec<ClassifyInput>,

    /// Operator mode for variable shapes. Defaults to the mode matching
    /// `pattern`.
    #[serde(default)]
    op_mode: Option<OpMode>,
}

impl Request {
    fn pattern(&self) -> Result<Pattern, Box<dyn Error>> {
        let opts = self.options.clone();
        let pattern = match self.pattern.as_str() {
            "elewise" => Pattern::Elewise(options(opts)?),
            "broadcast" => Pattern::Broadcast(options(opts)?),
            "reduce" => Pattern::Reduce(options(opts)?),
            "split" => Pattern::Split(options(opts)?),
            "transdata" => Pattern::Transdata(options(opts)?),
            "norm" => Pattern::Norm(options(opts)?),
            other => return Err(format!("unknown pattern \"{}\"", other).into()),
        };
        Ok(pattern)
    }

    fn op_mode(&self) -> OpMode {
        self.op_mode.unwrap_or(match self.pattern.as_str() {
            "reduce" => OpMode::Reduce,
            "transdata" => OpMode::Transdata,
            "norm" => OpMode::Norm,
            _ => OpMode::Elewise,
        })
    }
}

/// Deserialize pattern options, using the defaults if none were given.
fn options<T: DeserializeOwned + Default>(
    value: Option<serde_json::Value>,
) -> Result<T, serde_json::Error> {
    match value {
        Some(value) => serde_json::from_value(value),
        None => Ok(T::default()),
    }
}

fn print_variant(
    session: &ClassificationSession,
    index: usize,
    variant: &Variant,
    op_mode: OpMode,
) -> Result<(), Box<dyn Error>> {
    println!("Variant {}: {}", index, variant);
    let shapes = session.variable_shape(variant, op_mode)?;
    for (input, dims) in shapes.iter().enumerate() {
        let dims: Vec<String> = dims.iter().map(|dim| format!("{:?}", dim)).collect();
        println!("  input {}: [{}]", input, dims.join(", "));
    }
    Ok(())
}

/// Tool which classifies the inputs of a dynamic-shape operator and prints
/// the variable shapes of each resulting variant.
///
/// ```text
/// cargo run -p varshape-cli -- request.json
/// ```
///
/// Set `RUST_LOG=debug` or pass `--verbose` for details of each
/// classification step.
fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args()?;

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let request: Request = serde_json::from_str(&fs::read_to_string(&args.request)?)?;
    debug!("request {:?}", request);
    let pattern = request.pattern()?;
    let op_mode = request.op_mode();

    let mut options = SessionOptions::from_env();
    options.verbose |= args.verbose;

    let mut session = ClassificationSession::enter(options);
    let variants = session.classify(&request.inputs, &pattern)?;
    println!(
        "{} classification: {} variants, op mode {}",
        pattern.name(),
        variants.len(),
        op_mode
    );
    for (i, variant) in variants.iter().enumerate() {
        print_variant(&session, i, variant, op_mode)?;
    }

    let ctx = session.exit();
    let entries: Vec<String> = ctx
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    println!("Context: {}", entries.join(" "));

    Ok(())
}

#[cfg(test)]
mod tests {
    use varshape::{OpMode, Pattern, ReduceOptions};
    use varshape_testing::TestCases;

    use super::Request;

    fn request(json: &str) -> Request {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_pattern() {
        let req = request(
            r#"{
                "pattern": "reduce",
                "options": {"keepdims": true},
                "inputs": [{"shape": [-1, 16], "range": [[1, null], [16, 16]]}, [1]]
            }"#,
        );
        assert_eq!(
            req.pattern().unwrap(),
            Pattern::Reduce(ReduceOptions {
                keepdims: true,
                ..Default::default()
            })
        );
        assert_eq!(req.inputs.len(), 2);
        assert_eq!(req.op_mode(), OpMode::Reduce);
    }

    #[test]
    fn test_default_op_mode() {
        #[derive(Debug)]
        struct Case {
            json: &'static str,
            op_mode: OpMode,
        }

        let cases = [
            Case {
                json: r#"{"pattern": "broadcast", "inputs": []}"#,
                op_mode: OpMode::Elewise,
            },
            Case {
                json: r#"{"pattern": "norm", "inputs": []}"#,
                op_mode: OpMode::Norm,
            },
            Case {
                json: r#"{"pattern": "split", "inputs": [], "op_mode": "transdata"}"#,
                op_mode: OpMode::Transdata,
            },
        ];

        cases.test_each(|case| {
            let req = request(case.json);
            assert!(req.pattern().is_ok());
            assert_eq!(req.op_mode(), case.op_mode);
        });
    }

    #[test]
    fn test_unknown_pattern() {
        let req = request(r#"{"pattern": "conv", "inputs": []}"#);
        let err = req.pattern().err().unwrap();
        assert_eq!(err.to_string(), "unknown pattern \"conv\"");
    }
}
