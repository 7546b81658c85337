//! Capture definitions: how an observation obtains its value automatically
//!
//! A [`Capture`] bundles an invocable with the positional and keyword arguments it should be called
//! with. The invocable may be synchronous (read the clock) or suspending (ask a multimeter for a
//! reading). Arguments are JSON values, or references to an earlier step whose current input is
//! substituted when the capture runs. That last form is how a step can compute e.g. the mean of
//! three prior readings.

use std::{
    collections::BTreeMap,
    error::Error,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
};
use serde_json::Value;
use thiserror::Error;
use crate::{
    decimal::Decimal,
    step::StepId,
};

pub type CaptureResult = Result<String, CaptureError>;

type BoxedError = Box<dyn Error + Send + Sync>;
type CaptureFuture = Pin<Box<dyn Future<Output = CaptureResult> + Send>>;
type SyncFn = dyn Fn(&Args) -> CaptureResult + Send + Sync;
type AsyncFn = dyn Fn(Args) -> CaptureFuture + Send + Sync;

#[derive(Debug, Error)]
pub enum CaptureError
{
    /// The invocable itself failed
    #[error("{0}")]
    Failed(#[source] BoxedError),
    #[error("missing positional argument {0}")]
    MissingArg(usize),
    #[error("missing keyword argument {0:?}")]
    MissingKwarg(String),
    #[error("argument {name} is not {expected}: {value}")]
    InvalidArg
    {
        name: String,
        expected: &'static str,
        value: Value,
    },
    #[error("capture refers to step {0} which does not exist")]
    UnknownStep(usize),
    #[error("suspending capture cannot be run synchronously")]
    Suspending,
}

impl CaptureError
{
    pub fn failed<E>(err: E) -> Self
        where E: Into<BoxedError>
    {
        Self::Failed(err.into())
    }
}

/// An argument as bound in the definition
#[derive(Debug, Clone, PartialEq)]
enum Arg
{
    Value(Value),
    Step(StepId),
}

/// Arguments after step references have been resolved
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args
{
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl Args
{
    pub fn positional(&self) -> &[Value]
    {
        &self.positional
    }

    pub fn keyword(&self) -> &BTreeMap<String, Value>
    {
        &self.keyword
    }

    pub fn get(&self, index: usize) -> Result<&Value, CaptureError>
    {
        self.positional.get(index).ok_or(CaptureError::MissingArg(index))
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value>
    {
        self.keyword.get(name)
    }

    pub fn require_kwarg(&self, name: &str) -> Result<&Value, CaptureError>
    {
        self.kwarg(name).ok_or_else(|| CaptureError::MissingKwarg(name.to_owned()))
    }

    /// Positional argument as an integer
    pub fn int(&self, index: usize) -> Result<i64, CaptureError>
    {
        as_int(&index.to_string(), self.get(index)?)
    }

    /// Keyword argument as an integer, or `default` when not given
    pub fn kwarg_int_or(&self, name: &str, default: i64) -> Result<i64, CaptureError>
    {
        match self.kwarg(name) {
            Some(value) => as_int(name, value),
            None => Ok(default),
        }
    }

    /// Positional argument as text
    pub fn text(&self, index: usize) -> Result<&str, CaptureError>
    {
        let value = self.get(index)?;
        value.as_str().ok_or_else(|| CaptureError::InvalidArg {
            name: index.to_string(),
            expected: "text",
            value: value.clone(),
        })
    }

    /// Positional argument as an exact decimal
    ///
    /// Accepts both JSON numbers and text, so a step reference (which resolves to the step's input
    /// text) can be used directly.
    pub fn decimal(&self, index: usize) -> Result<Decimal, CaptureError>
    {
        let value = self.get(index)?;
        let parsed = match value {
            Value::String(text) => text.parse::<Decimal>().ok(),
            Value::Number(number) => number.to_string().parse::<Decimal>().ok(),
            _ => None,
        };

        parsed.ok_or_else(|| CaptureError::InvalidArg {
            name: index.to_string(),
            expected: "a decimal number",
            value: value.clone(),
        })
    }
}

fn as_int(name: &str, value: &Value) -> Result<i64, CaptureError>
{
    value.as_i64().ok_or_else(|| CaptureError::InvalidArg {
        name: name.to_owned(),
        expected: "an integer",
        value: value.clone(),
    })
}

#[derive(Clone)]
enum Invocable
{
    Sync(Arc<SyncFn>),
    Suspending(Arc<AsyncFn>),
}

/// An invocable plus the arguments to call it with
///
/// ```
/// use benchsheet::Capture;
///
/// let sum = Capture::new(|args| Ok::<_, benchsheet::CaptureError>(args.int(0)? + args.int(1)?))
///     .arg(1)
///     .arg(3);
/// assert_eq!(sum.invoke_blocking(&sum.bind_values().unwrap()).unwrap(), "4");
/// ```
#[derive(Clone)]
pub struct Capture
{
    invocable: Invocable,
    positional: Vec<Arg>,
    keyword: BTreeMap<String, Arg>,
}

impl Capture
{
    /// Capture from a synchronous function
    pub fn new<F, T, E>(func: F) -> Self
        where F: Fn(&Args) -> Result<T, E> + Send + Sync + 'static,
              T: fmt::Display,
              E: Into<BoxedError>,
    {
        let invocable: Arc<SyncFn> = Arc::new(move |args: &Args| {
            func(args).map(|value| value.to_string()).map_err(into_capture_error)
        });

        Self::with(Invocable::Sync(invocable))
    }

    /// Capture from a function returning a future, e.g. an instrument query
    pub fn new_async<F, Fut, T, E>(func: F) -> Self
        where F: Fn(Args) -> Fut + Send + Sync + 'static,
              Fut: Future<Output = Result<T, E>> + Send + 'static,
              T: fmt::Display,
              E: Into<BoxedError>,
    {
        let invocable: Arc<AsyncFn> = Arc::new(move |args: Args| {
            let pending = func(args);
            Box::pin(async move {
                pending.await.map(|value| value.to_string()).map_err(into_capture_error)
            }) as CaptureFuture
        });

        Self::with(Invocable::Suspending(invocable))
    }

    fn with(invocable: Invocable) -> Self
    {
        Self {
            invocable: invocable,
            positional: Vec::new(),
            keyword: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self
    {
        self.positional.push(Arg::Value(value.into()));
        self
    }

    /// Append a positional argument which takes the current input of another step
    pub fn step_arg(mut self, step: StepId) -> Self
    {
        self.positional.push(Arg::Step(step));
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<Value>) -> Self
    {
        self.keyword.insert(name.to_owned(), Arg::Value(value.into()));
        self
    }

    pub fn step_kwarg(mut self, name: &str, step: StepId) -> Self
    {
        self.keyword.insert(name.to_owned(), Arg::Step(step));
        self
    }

    pub fn is_suspending(&self) -> bool
    {
        matches!(self.invocable, Invocable::Suspending(_))
    }

    /// Steps whose input this capture reads
    pub fn step_refs(&self) -> impl Iterator<Item = StepId> + '_
    {
        self.positional
            .iter()
            .chain(self.keyword.values())
            .filter_map(|arg| match arg {
                Arg::Step(step) => Some(*step),
                Arg::Value(_) => None,
            })
    }

    /// Resolve the bound arguments, looking up step references through `lookup`
    pub fn bind<L>(&self, lookup: L) -> Result<Args, CaptureError>
        where L: Fn(StepId) -> Option<String>
    {
        let resolve = |arg: &Arg| -> Result<Value, CaptureError> {
            match arg {
                Arg::Value(value) => Ok(value.clone()),
                Arg::Step(step) => lookup(*step)
                    .map(Value::String)
                    .ok_or(CaptureError::UnknownStep(step.index())),
            }
        };

        let positional = self.positional.iter().map(&resolve).collect::<Result<Vec<_>, _>>()?;
        let keyword = self.keyword
            .iter()
            .map(|(name, arg)| Ok((name.clone(), resolve(arg)?)))
            .collect::<Result<BTreeMap<_, _>, CaptureError>>()?;

        Ok(Args {
            positional: positional,
            keyword: keyword,
        })
    }

    /// Resolve arguments for a capture with no step references
    pub fn bind_values(&self) -> Result<Args, CaptureError>
    {
        self.bind(|_| None)
    }

    /// Run the capture, awaiting it if it suspends
    pub async fn invoke(&self, args: Args) -> CaptureResult
    {
        match &self.invocable {
            Invocable::Sync(func) => func(&args),
            Invocable::Suspending(func) => func(args).await,
        }
    }

    /// Run a synchronous capture in place
    pub fn invoke_blocking(&self, args: &Args) -> CaptureResult
    {
        match &self.invocable {
            Invocable::Sync(func) => func(args),
            Invocable::Suspending(_) => Err(CaptureError::Suspending),
        }
    }
}

fn into_capture_error<E>(err: E) -> CaptureError
    where E: Into<BoxedError>
{
    let err: BoxedError = err.into();

    // argument errors raised from inside the invocable keep their own variant
    match err.downcast::<CaptureError>() {
        Ok(capture_err) => *capture_err,
        Err(other) => CaptureError::Failed(other),
    }
}

impl fmt::Debug for Capture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Capture")
            .field("suspending", &self.is_suspending())
            .field("positional", &self.positional)
            .field("keyword", &self.keyword)
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use std::time::Duration;
    use serde_json::json;
    use super::{ Args, Capture, CaptureError };
    use crate::step::StepId;

    fn run(capture: &Capture) -> Result<String, CaptureError>
    {
        capture.invoke_blocking(&capture.bind_values()?)
    }

    #[test]
    fn bare_function_takes_no_args()
    {
        let capture = Capture::new(|args: &Args| {
            assert!(args.positional().is_empty());
            assert!(args.keyword().is_empty());
            Ok::<_, CaptureError>(4)
        });

        assert_eq!(run(&capture).unwrap(), "4");
    }

    #[test]
    fn positional_and_keyword_args()
    {
        let simple = |args: &Args| -> Result<i64, CaptureError> {
            Ok(args.int(0)? + args.int(1)? + args.kwarg_int_or("another", 2)?)
        };

        assert_eq!(run(&Capture::new(simple).arg(1).arg(3)).unwrap(), "6");
        assert_eq!(run(&Capture::new(simple).arg(1).arg(0).kwarg("another", 3)).unwrap(), "4");

        let kwargs_only = |args: &Args| -> Result<i64, CaptureError> {
            Ok(args.kwarg_int_or("yet", 2)? + args.kwarg_int_or("another", 5)?)
        };

        assert_eq!(run(&Capture::new(kwargs_only)).unwrap(), "7");
        assert_eq!(run(&Capture::new(kwargs_only).kwarg("yet", 5)).unwrap(), "10");
    }

    #[test]
    fn binding_keeps_argument_shape()
    {
        let capture = Capture::new(|_: &Args| Ok::<_, CaptureError>("")).arg(1).kwarg("x", 3);
        let args = capture.bind_values().unwrap();

        assert_eq!(args.positional(), &[json!(1)]);
        assert_eq!(args.kwarg("x"), Some(&json!(3)));
    }

    #[test]
    fn step_references_resolve_to_inputs()
    {
        let capture = Capture::new(|args: &Args| {
            args.decimal(0)?
                .checked_add(args.decimal(1)?)
                .ok_or_else(|| CaptureError::failed("sum overflowed"))
        })
            .step_arg(StepId::new(0))
            .step_arg(StepId::new(2));

        assert_eq!(capture.step_refs().collect::<Vec<_>>(), vec![StepId::new(0), StepId::new(2)]);

        let args = capture
            .bind(|step| match step.index() {
                0 => Some("1.25".to_owned()),
                2 => Some("2.5".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(capture.invoke_blocking(&args).unwrap(), "3.75");

        assert!(matches!(capture.bind(|_| None), Err(CaptureError::UnknownStep(0))));
    }

    #[test]
    fn failures_propagate()
    {
        let capture = Capture::new(|_: &Args| Err::<String, _>("meter unplugged"));
        let err = run(&capture).unwrap_err();

        assert!(matches!(err, CaptureError::Failed(_)));
        assert_eq!(err.to_string(), "meter unplugged");

        let capture = Capture::new(|args: &Args| args.int(0));
        assert!(matches!(run(&capture), Err(CaptureError::MissingArg(0))));

        let capture = Capture::new(|args: &Args| args.int(0)).arg("seven");
        assert!(matches!(run(&capture), Err(CaptureError::InvalidArg { .. })));

        let capture = Capture::new(|args: &Args| args.require_kwarg("range").map(|value| value.to_string()));
        assert!(matches!(run(&capture), Err(CaptureError::MissingKwarg(name)) if name == "range"));
    }

    #[tokio::test]
    async fn suspending_capture()
    {
        let capture = Capture::new_async(|_: Args| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, CaptureError>(4)
        });

        assert!(capture.is_suspending());
        assert_eq!(capture.invoke(capture.bind_values().unwrap()).await.unwrap(), "4");
        assert!(matches!(run(&capture), Err(CaptureError::Suspending)));
    }

    #[tokio::test]
    async fn sync_capture_invokes_through_async_path()
    {
        let capture = Capture::new(|args: &Args| Ok::<_, CaptureError>(args.int(0)? * 2)).arg(21);
        assert_eq!(capture.invoke(capture.bind_values().unwrap()).await.unwrap(), "42");
    }
}
