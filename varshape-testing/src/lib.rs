//! Testing utilities for the varshape crates.

use std::fmt::Debug;
use std::panic::{RefUnwindSafe, UnwindSafe, catch_unwind};

/// Table-driven tests.
///
/// Put the data for one case in a `Debug` struct, conventionally named
/// `Case`, collect the cases in an array or `Vec` and call
/// [`test_each`](TestCases::test_each) with the test body. Every case is run
/// even if an earlier one panics. Afterwards, the call panics if any case
/// failed, listing the `Debug` representation of each failing case.
///
/// ```
/// use varshape_testing::TestCases;
///
/// fn test_div_ceil() {
///     #[derive(Debug)]
///     struct Case {
///         size: i64,
///         block: i64,
///         expected: i64,
///     }
///
///     let cases = [
///         Case { size: 33, block: 16, expected: 3 },
///         Case { size: 32, block: 16, expected: 2 },
///     ];
///
///     cases.test_each(|case| {
///         assert_eq!(case.size.div_ceil(case.block), case.expected);
///     });
/// }
/// # test_div_ceil();
/// ```
///
/// Cases and anything the test body captures must be unwind safe, since each
/// case runs inside [`catch_unwind`]. Descriptors and expressions are, but
/// values with interior mutability should be created inside the test body or
/// wrapped in [`AssertUnwindSafe`](std::panic::AssertUnwindSafe).
pub trait TestCases {
    /// The data for a single test case.
    type Case;

    /// Run `test` with a reference to each case.
    fn test_each(self, test: impl Fn(&Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + RefUnwindSafe;

    /// Run `test` with a clone of each case.
    ///
    /// Useful when the test body wants to consume the case, eg. to pass an
    /// owned descriptor to a builder.
    fn test_each_clone(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + Clone + UnwindSafe;

    /// Run `test` with each case by value.
    ///
    /// Each case is formatted before it is run, so it can be reported if the
    /// test panics.
    fn test_each_value(self, test: impl Fn(Self::Case) + RefUnwindSafe)
    where
        Self::Case: Debug + UnwindSafe;
}

/// Failing cases collected while running a table.
struct Failures(Vec<String>);

impl Failures {
    fn new() -> Self {
        Failures(Vec::new())
    }

    fn check(&mut self, case: impl FnOnce() -> String, test: impl FnOnce() + UnwindSafe) {
        if catch_unwind(test).is_err() {
            self.0.push(case());
        }
    }

    fn finish(self) {
        let Failures(failed) = self;
        if !failed.is_empty() {
            panic!("{} test cases failed: [{}]", failed.len(), failed.join(", "));
        }
    }
}

impl<I: IntoIterator> TestCases for I {
    type Case = I::Item;

    fn test_each(self, test: impl Fn(&I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + RefUnwindSafe,
    {
        let mut failures = Failures::new();
        for case in self {
            failures.check(|| format!("{:?}", case), || test(&case));
        }
        failures.finish();
    }

    fn test_each_clone(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + Clone + UnwindSafe,
    {
        let mut failures = Failures::new();
        for case in self {
            let value = case.clone();
            let test = &test;
            failures.check(|| format!("{:?}", case), move || test(value));
        }
        failures.finish();
    }

    fn test_each_value(self, test: impl Fn(I::Item) + RefUnwindSafe)
    where
        I::Item: Debug + UnwindSafe,
    {
        let mut failures = Failures::new();
        for case in self {
            let label = format!("{:?}", case);
            let test = &test;
            failures.check(|| label, move || test(case));
        }
        failures.finish();
    }
}
