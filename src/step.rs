//! Steps of a test procedure and their compliance state machine

use std::fmt;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::{
    capture::Capture,
    specs::Spec,
};

/// Position of a step within its sheet
///
/// Returned when a step is added so that later steps can bind captures to its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(usize);

impl StepId
{
    pub fn new(index: usize) -> Self
    {
        Self(index)
    }

    pub fn index(&self) -> usize
    {
        self.0
    }
}

impl fmt::Display for StepId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0 + 1)
    }
}

/// The verdict recorded for a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Compliance
{
    #[default]
    Unset,
    Pass,
    Fail,
}

impl Compliance
{
    /// `None` while no verdict has been given
    pub fn verdict(self) -> Option<Self>
    {
        match self {
            Self::Unset => None,
            set => Some(set),
        }
    }

    pub fn is_set(self) -> bool
    {
        self != Self::Unset
    }
}

impl fmt::Display for Compliance
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            Self::Unset => "-",
            Self::Pass => "Pass",
            Self::Fail => "Fail",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError
{
    /// The observed value does not show enough digits after the decimal point
    #[error("{required} or more decimal places required!")]
    Precision { required: u32 },
    #[error("This step does not take an observation")]
    NoInput,
    #[error("This step does not have an automatic observation function")]
    NoCapture,
    /// Index past the end of the sheet
    #[error("There is no step {0}")]
    NoStep(usize),
}

/// Options for an observation step
///
/// Every option is optional. Without a spec, confirming the step always passes.
#[derive(Debug, Clone, Default)]
pub struct ObservationParams
{
    unit: Option<String>,
    spec: Option<Spec>,
    capture: Option<Capture>,
    min_decimal_places: Option<u32>,
}

impl ObservationParams
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Unit label shown next to the input
    pub fn unit(mut self, unit: &str) -> Self
    {
        self.unit = Some(unit.to_owned());
        self
    }

    pub fn spec(mut self, spec: Spec) -> Self
    {
        self.spec = Some(spec);
        self
    }

    pub fn capture(mut self, capture: Capture) -> Self
    {
        self.capture = Some(capture);
        self
    }

    /// Refuse to confirm values written with fewer digits after the point
    pub fn min_decimal_places(mut self, places: u32) -> Self
    {
        self.min_decimal_places = Some(places);
        self
    }
}

/// The data-bearing half of an observation step
#[derive(Debug, Clone)]
pub struct Observation
{
    unit: Option<String>,
    spec: Option<Spec>,
    capture: Option<Capture>,
    min_decimal_places: Option<u32>,
    input: String,
}

impl Observation
{
    fn from_params(params: ObservationParams) -> Self
    {
        Self {
            unit: params.unit,
            spec: params.spec,
            capture: params.capture,
            min_decimal_places: params.min_decimal_places,
            input: String::new(),
        }
    }

    /// Whether the input is short of the required decimal places
    ///
    /// Empty input has not been attempted yet and is never short.
    fn precision_error(&self) -> Option<StepError>
    {
        let required = self.min_decimal_places?;

        if self.input.is_empty() {
            return None;
        }

        let short = match self.input.split('.').nth(1) {
            None => true,
            Some(fraction) => fraction.chars().count() < required as usize,
        };

        if short {
            Some(StepError::Precision { required: required })
        }
        else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub enum StepKind
{
    /// An instruction for the operator with nothing to record but the verdict
    Simple,
    Observation(Observation),
}

/// One line of a procedure
#[derive(Debug, Clone)]
pub struct Step
{
    reference: Option<String>,
    procedure: String,
    compliance: Compliance,
    note: Option<String>,
    kind: StepKind,
}

impl Step
{
    pub fn simple(reference: Option<String>, procedure: String) -> Self
    {
        Self {
            reference: reference,
            procedure: procedure,
            compliance: Compliance::Unset,
            note: None,
            kind: StepKind::Simple,
        }
    }

    pub fn observation(reference: Option<String>, procedure: String, params: ObservationParams) -> Self
    {
        Self {
            reference: reference,
            procedure: procedure,
            compliance: Compliance::Unset,
            note: None,
            kind: StepKind::Observation(Observation::from_params(params)),
        }
    }

    pub fn reference(&self) -> Option<&str>
    {
        self.reference.as_deref()
    }

    pub fn procedure(&self) -> &str
    {
        &self.procedure
    }

    pub fn compliance(&self) -> Compliance
    {
        self.compliance
    }

    pub fn note(&self) -> Option<&str>
    {
        self.note.as_deref()
    }

    pub fn kind(&self) -> &StepKind
    {
        &self.kind
    }

    fn observation_ref(&self) -> Option<&Observation>
    {
        match &self.kind {
            StepKind::Observation(observation) => Some(observation),
            StepKind::Simple => None,
        }
    }

    pub fn is_observation(&self) -> bool
    {
        self.observation_ref().is_some()
    }

    /// Current observed text. `None` for simple steps.
    pub fn input(&self) -> Option<&str>
    {
        self.observation_ref().map(|observation| observation.input.as_str())
    }

    pub fn unit(&self) -> Option<&str>
    {
        self.observation_ref().and_then(|observation| observation.unit.as_deref())
    }

    pub fn spec(&self) -> Option<&Spec>
    {
        self.observation_ref().and_then(|observation| observation.spec.as_ref())
    }

    pub fn capture(&self) -> Option<&Capture>
    {
        self.observation_ref().and_then(|observation| observation.capture.as_ref())
    }

    pub fn min_decimal_places(&self) -> Option<u32>
    {
        self.observation_ref().and_then(|observation| observation.min_decimal_places)
    }

    /// Replace the observed text
    pub fn set_input(&mut self, text: &str) -> Result<(), StepError>
    {
        match &mut self.kind {
            StepKind::Observation(observation) => {
                observation.input.clear();
                observation.input.push_str(text);
                Ok(())
            },
            StepKind::Simple => Err(StepError::NoInput),
        }
    }

    /// The warning to show while the input is short of the required precision, if any
    pub fn precision_warning(&self) -> Option<StepError>
    {
        self.observation_ref().and_then(Observation::precision_error)
    }

    /// Commit the step
    ///
    /// Without a spec the step passes. With one, the step passes iff the input complies. A step
    /// requiring decimal places refuses to commit non-empty input that is short of them, leaving
    /// compliance untouched.
    pub fn confirm(&mut self) -> Result<Compliance, StepError>
    {
        if let Some(err) = self.precision_warning() {
            return Err(err);
        }

        let verdict = match self.observation_ref() {
            Some(Observation { spec: Some(spec), input, .. }) => {
                if spec.complies(input.as_str()) { Compliance::Pass } else { Compliance::Fail }
            },
            _ => Compliance::Pass,
        };

        self.compliance = verdict;
        Ok(verdict)
    }

    /// Manually select a verdict
    ///
    /// Selecting the verdict already recorded clears it back to [`Compliance::Unset`]. Returns the
    /// resulting compliance.
    pub fn toggle_compliance(&mut self, value: Compliance) -> Compliance
    {
        self.compliance = if value == self.compliance { Compliance::Unset } else { value };
        self.compliance
    }

    /// Clear the verdict and any observed text. Notes are kept.
    pub fn reset(&mut self)
    {
        self.compliance = Compliance::Unset;

        if let StepKind::Observation(observation) = &mut self.kind {
            observation.input.clear();
        }
    }

    pub fn set_note(&mut self, note: &str)
    {
        self.note = Some(note.to_owned());
    }

    pub fn delete_note(&mut self)
    {
        self.note = None;
    }
}
