//! Test sheets: an ordered procedure plus the session walking through it
//!
//! # Session Model
//! A [`Sheet`] owns its steps in the order they were added and a cursor marking the step which
//! has focus. A front-end forwards the operator's actions as calls on the sheet:
//!   - [`Sheet::confirm`] commits a step and moves focus to the next one
//!   - [`Sheet::toggle_compliance`] sets or clears a verdict by hand
//!   - [`Sheet::capture`] fills in an observation automatically
//!   - [`Sheet::focus_step`] follows the operator clicking into a step
//!
//! Every change to a verdict, observation, or note hands a fresh [`SheetRecord`] to the sheet's
//! [`Recorder`], so the run on disk is never behind the screen.
//!
//! Failures the operator should hear about, such as a capture that failed or a value short of
//! its required precision, are queued as [`Notice`]s. None of them stop the session.

use std::{
    path::{ Path, PathBuf },
    sync::Arc,
};
use chrono::Local;
use log::{ info, warn };
use thiserror::Error;
use crate::{
    capture::CaptureError,
    instrument::Instrument,
    specs::SpecError,
    record::{ record_file_name, NullRecorder, RecordError, Recorder, SheetRecord, StepRecord, SystemInfo },
    step::{ Compliance, ObservationParams, Step, StepError, StepId },
};

/// A mistake in how the procedure was written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SheetError
{
    #[error("step text {0:?} opens a reference with '(' but never closes it")]
    UnclosedRef(String),
    #[error("capture for step {step} refers to step {target} which comes at or after it")]
    ForwardRef { step: usize, target: usize },
    #[error("invalid spec: {0}")]
    Spec(#[from] SpecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel
{
    Positive,
    Warning,
    Negative,
}

/// A transient message for the operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice
{
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice
{
    fn new(level: NoticeLevel, message: impl Into<String>) -> Self
    {
        Self {
            level: level,
            message: message.into(),
        }
    }
}

/// Splits a leading parenthesized reference off step text
///
/// `"(1.2) Do X"` gives `(Some("1.2"), "Do X")`. Text not starting with `(` has no reference.
pub fn extract_ref(text: &str) -> Result<(Option<String>, String), SheetError>
{
    match text.strip_prefix('(') {
        Some(rest) => {
            let (reference, procedure) = rest
                .split_once(')')
                .ok_or_else(|| SheetError::UnclosedRef(text.to_owned()))?;

            Ok((Some(reference.trim().to_owned()), procedure.trim().to_owned()))
        },
        None => Ok((None, text.to_owned())),
    }
}

pub struct Sheet
{
    title: String,
    version: Option<String>,
    steps: Vec<Step>,
    cursor: usize,
    instruments: Vec<Arc<dyn Instrument>>,
    recorder: Box<dyn Recorder>,
    notices: Vec<Notice>,
}

impl Sheet
{
    pub fn new(title: &str) -> Self
    {
        Self {
            title: title.to_owned(),
            version: None,
            steps: Vec::new(),
            cursor: 0,
            instruments: Vec::new(),
            recorder: Box::new(NullRecorder),
            notices: Vec::new(),
        }
    }

    /// Revision of the procedure, carried into the record
    pub fn version(mut self, version: &str) -> Self
    {
        self.version = Some(version.to_owned());
        self
    }

    /// Where snapshots go after every change
    pub fn recorder(mut self, recorder: impl Recorder + 'static) -> Self
    {
        self.recorder = Box::new(recorder);
        self
    }

    pub fn title(&self) -> &str
    {
        &self.title
    }

    pub fn steps(&self) -> &[Step]
    {
        &self.steps
    }

    pub fn step(&self, id: StepId) -> Option<&Step>
    {
        self.steps.get(id.index())
    }

    pub fn len(&self) -> usize
    {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.steps.is_empty()
    }

    /// Index of the focused step
    pub fn cursor(&self) -> usize
    {
        self.cursor
    }

    pub fn current(&self) -> Option<&Step>
    {
        self.steps.get(self.cursor)
    }

    /// Add an observation step
    ///
    /// A capture may take earlier steps' inputs as arguments, but not its own or later ones.
    pub fn observe(&mut self, text: &str, params: ObservationParams) -> Result<StepId, SheetError>
    {
        let (reference, procedure) = extract_ref(text)?;
        let id = StepId::new(self.steps.len());
        let step = Step::observation(reference, procedure, params);

        if let Some(target) = step.capture().and_then(|capture| capture.step_refs().find(|target| *target >= id)) {
            return Err(SheetError::ForwardRef { step: id.index(), target: target.index() });
        }

        self.steps.push(step);
        Ok(id)
    }

    /// Add a step with nothing to observe
    pub fn perform(&mut self, text: &str) -> Result<StepId, SheetError>
    {
        let (reference, procedure) = extract_ref(text)?;
        let id = StepId::new(self.steps.len());

        self.steps.push(Step::simple(reference, procedure));
        Ok(id)
    }

    /// Register an instrument this sheet captures from
    pub fn instrument(&mut self, instrument: Arc<dyn Instrument>)
    {
        self.instruments.push(instrument);
    }

    pub fn instruments(&self) -> &[Arc<dyn Instrument>]
    {
        &self.instruments
    }

    /// Move focus to the next step. Stays put on the last one.
    pub fn advance(&mut self) -> usize
    {
        if self.cursor + 1 < self.steps.len() {
            self.cursor += 1;
        }

        self.cursor
    }

    /// Move focus to the previous step. Stays put on the first one.
    pub fn go_back(&mut self) -> usize
    {
        self.cursor = self.cursor.saturating_sub(1);
        self.cursor
    }

    /// Follow the operator into a step. Indices past the end are ignored.
    pub fn focus_step(&mut self, index: usize)
    {
        if index < self.steps.len() {
            self.cursor = index;
        }
    }

    /// Commit a step and move on
    ///
    /// Returns the verdict, or `None` when there is no such step or the step refused to commit
    /// (in which case a warning notice says why and focus stays).
    pub fn confirm(&mut self, index: usize) -> Option<Compliance>
    {
        self.focus_step(index);

        match self.steps.get_mut(index)?.confirm() {
            Ok(verdict) => {
                self.on_changed();
                self.advance();
                Some(verdict)
            },
            Err(err) => {
                self.notify(NoticeLevel::Warning, err.to_string());
                None
            },
        }
    }

    /// Set a verdict by hand; choosing the current verdict again clears it
    ///
    /// Focus moves on when a verdict is left set.
    pub fn toggle_compliance(&mut self, index: usize, value: Compliance) -> Option<Compliance>
    {
        self.focus_step(index);
        let result = self.steps.get_mut(index)?.toggle_compliance(value);
        self.on_changed();

        if result.is_set() {
            self.advance();
        }

        Some(result)
    }

    /// Replace an observation's text
    pub fn set_input(&mut self, index: usize, text: &str) -> Result<(), StepError>
    {
        match self.steps.get_mut(index) {
            Some(step) => step.set_input(text)?,
            None => return Err(StepError::NoStep(index + 1)),
        }

        self.on_changed();
        Ok(())
    }

    /// Precision warning for the step's current input, for display while typing
    pub fn precision_warning(&self, index: usize) -> Option<StepError>
    {
        self.steps.get(index)?.precision_warning()
    }

    /// Fill in a step's observation from its capture definition
    ///
    /// On success the input is replaced and focus moves to the step; compliance is left for the
    /// operator to confirm. On failure nothing about the step changes and a negative notice names
    /// the failure.
    pub async fn capture(&mut self, index: usize) -> Result<String, CaptureError>
    {
        let capture = match self.steps.get(index).and_then(Step::capture) {
            Some(capture) => capture.clone(),
            None => {
                self.notify(NoticeLevel::Warning, StepError::NoCapture.to_string());
                return Err(CaptureError::failed(StepError::NoCapture));
            },
        };

        let steps = &self.steps;
        let outcome = match capture.bind(|id| steps.get(id.index()).and_then(Step::input).map(str::to_owned)) {
            Ok(args) => capture.invoke(args).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(value) => {
                // capture only exists on observation steps, so this cannot be refused
                let _ = self.steps[index].set_input(&value);
                self.focus_step(index);
                self.on_changed();
                Ok(value)
            },
            Err(err) => {
                warn!("capture for step {} failed: {}", index + 1, err);
                self.notify(NoticeLevel::Negative, format!("Automatic observation failed!\n{}", err));
                Err(err)
            },
        }
    }

    pub fn set_note(&mut self, index: usize, note: &str)
    {
        if let Some(step) = self.steps.get_mut(index) {
            step.set_note(note);
            self.on_changed();
        }
    }

    pub fn delete_note(&mut self, index: usize)
    {
        if let Some(step) = self.steps.get_mut(index) {
            step.delete_note();
            self.on_changed();
        }
    }

    /// Clear every verdict and observation, keeping the procedure itself
    pub fn reset(&mut self)
    {
        for step in self.steps.iter_mut() {
            step.reset();
        }

        self.cursor = 0;
        self.on_changed();
    }

    /// Ask every registered instrument to identify itself
    pub async fn test_connections(&mut self)
    {
        let instruments = self.instruments.clone();

        for instrument in instruments {
            match instrument.test_connection().await {
                Ok(message) => self.notify(NoticeLevel::Positive, message),
                Err(err) => {
                    warn!("{} did not answer: {}", instrument.name(), err);
                    self.notify(NoticeLevel::Negative, format!("Connection failed!\n{}", err));
                },
            }
        }
    }

    /// Snapshot of the sheet as it stands
    pub fn record(&self) -> SheetRecord
    {
        SheetRecord {
            last_edit: Local::now(),
            title: self.title.clone(),
            version: self.version.clone(),
            system: SystemInfo::current(),
            steps: self.steps.iter().map(StepRecord::from).collect(),
        }
    }

    /// Write the final record into `data_dir` under a name made from the title and the time
    pub fn finish(&mut self, data_dir: &Path) -> Result<PathBuf, RecordError>
    {
        let record = self.record();
        let path = data_dir.join(record_file_name(&self.title, &record.last_edit));

        record.write_to(&path)?;
        info!("saved {} to {}", self.title, path.display());
        self.notify(NoticeLevel::Positive, format!("Saved {}", path.display()));
        Ok(path)
    }

    /// Take the notices queued since the last call
    pub fn drain_notices(&mut self) -> Vec<Notice>
    {
        std::mem::take(&mut self.notices)
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>)
    {
        self.notices.push(Notice::new(level, message));
    }

    fn on_changed(&mut self)
    {
        let record = self.record();

        if let Err(err) = self.recorder.record(&record) {
            warn!("failed to record {}: {}", self.title, err);
            self.notify(NoticeLevel::Warning, format!("Could not save progress: {}", err));
        }
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::{ Arc, Mutex };
    use crate::{
        capture::{ Args, Capture, CaptureError },
        record::{ RecordError, Recorder, SheetRecord },
        specs::Spec,
        step::{ Compliance, ObservationParams, StepError, StepId },
    };
    use super::{ extract_ref, NoticeLevel, Sheet, SheetError };

    #[derive(Clone, Default)]
    struct MemoryRecorder
    {
        records: Arc<Mutex<Vec<SheetRecord>>>,
    }

    impl MemoryRecorder
    {
        fn count(&self) -> usize
        {
            self.records.lock().unwrap().len()
        }

        fn last(&self) -> SheetRecord
        {
            self.records.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl Recorder for MemoryRecorder
    {
        fn record(&mut self, record: &SheetRecord) -> Result<(), RecordError>
        {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct BrokenRecorder;

    impl Recorder for BrokenRecorder
    {
        fn record(&mut self, _record: &SheetRecord) -> Result<(), RecordError>
        {
            Err(RecordError::Io {
                path: "/nowhere/tmp.json".into(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }
    }

    fn range_sheet() -> Sheet
    {
        let mut sheet = Sheet::new("PSU acceptance");
        sheet.observe("(1.2) Measure voltage of R1", ObservationParams::new()
            .unit("V")
            .spec(Spec::range("[5.50, 8.30]").unwrap())
        ).unwrap();
        sheet.perform("(1.3) Set POWER switch to OFF").unwrap();
        sheet
    }

    #[test]
    fn extracts_leading_reference()
    {
        assert_eq!(extract_ref("(1.2) Do X").unwrap(), (Some("1.2".to_owned()), "Do X".to_owned()));
        assert_eq!(extract_ref("( 3 )Do Y ").unwrap(), (Some("3".to_owned()), "Do Y".to_owned()));
        assert_eq!(extract_ref("Do X (now)").unwrap(), (None, "Do X (now)".to_owned()));
        assert_eq!(extract_ref("").unwrap(), (None, String::new()));
        assert_eq!(extract_ref("(1.2 Do X"), Err(SheetError::UnclosedRef("(1.2 Do X".to_owned())));
    }

    #[test]
    fn confirm_records_verdict_and_advances()
    {
        let mut sheet = range_sheet();

        sheet.set_input(0, "7.0").unwrap();
        assert_eq!(sheet.confirm(0), Some(Compliance::Pass));
        assert_eq!(sheet.cursor(), 1);

        sheet.focus_step(0);
        sheet.set_input(0, "9.0").unwrap();
        assert_eq!(sheet.confirm(0), Some(Compliance::Fail));
        assert_eq!(sheet.cursor(), 1);
    }

    #[test]
    fn set_input_names_missing_step()
    {
        let recorder = MemoryRecorder::default();
        let mut sheet = range_sheet().recorder(recorder.clone());

        assert_eq!(sheet.set_input(2, "7.0"), Err(StepError::NoStep(3)));
        assert_eq!(sheet.set_input(1, "7.0"), Err(StepError::NoInput));
        assert_eq!(StepError::NoStep(3).to_string(), "There is no step 3");
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn navigation_is_clamped()
    {
        let mut sheet = range_sheet();

        assert_eq!(sheet.go_back(), 0);
        assert_eq!(sheet.advance(), 1);
        assert_eq!(sheet.advance(), 1);

        // confirming the last step keeps focus on it
        assert_eq!(sheet.confirm(1), Some(Compliance::Pass));
        assert_eq!(sheet.cursor(), 1);

        sheet.focus_step(7);
        assert_eq!(sheet.cursor(), 1);
        assert_eq!(sheet.confirm(7), None);

        let mut empty = Sheet::new("empty");
        assert_eq!(empty.advance(), 0);
        assert_eq!(empty.go_back(), 0);
        assert!(empty.current().is_none());
    }

    #[test]
    fn toggle_advances_only_when_set()
    {
        let mut sheet = range_sheet();

        assert_eq!(sheet.toggle_compliance(0, Compliance::Pass), Some(Compliance::Pass));
        assert_eq!(sheet.cursor(), 1);

        assert_eq!(sheet.toggle_compliance(0, Compliance::Pass), Some(Compliance::Unset));
        assert_eq!(sheet.cursor(), 0);

        assert_eq!(sheet.toggle_compliance(0, Compliance::Fail), Some(Compliance::Fail));
        assert_eq!(sheet.steps()[0].compliance(), Compliance::Fail);
    }

    #[test]
    fn every_change_is_written_through()
    {
        let recorder = MemoryRecorder::default();
        let mut sheet = range_sheet().version("B").recorder(recorder.clone());

        sheet.set_input(0, "6.1").unwrap();
        sheet.confirm(0);
        sheet.set_note(1, "switch sticks");
        sheet.toggle_compliance(1, Compliance::Fail);
        assert_eq!(recorder.count(), 4);

        let last = recorder.last();
        assert_eq!(last.title, "PSU acceptance");
        assert_eq!(last.version.as_deref(), Some("B"));
        assert_eq!(last.steps[0].reference.as_deref(), Some("1.2"));
        assert_eq!(last.steps[0].input.as_deref(), Some("6.1"));
        assert_eq!(last.steps[0].compliance, Some(Compliance::Pass));
        assert_eq!(last.steps[1].input, None);
        assert_eq!(last.steps[1].compliance, Some(Compliance::Fail));
        assert_eq!(last.steps[1].note.as_deref(), Some("switch sticks"));

        sheet.delete_note(1);
        assert_eq!(recorder.last().steps[1].note, None);
    }

    #[test]
    fn recorder_failure_is_a_notice()
    {
        let mut sheet = range_sheet().recorder(BrokenRecorder);

        sheet.toggle_compliance(1, Compliance::Pass);

        let notices = sheet.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Warning);
        assert!(sheet.drain_notices().is_empty());
        assert_eq!(sheet.steps()[1].compliance(), Compliance::Pass);
    }

    #[test]
    fn precision_gate_holds_focus()
    {
        let mut sheet = Sheet::new("gate");
        sheet.observe("Measure", ObservationParams::new().min_decimal_places(3)).unwrap();
        sheet.perform("Next").unwrap();

        sheet.set_input(0, "1.5").unwrap();
        assert_eq!(sheet.precision_warning(0), Some(StepError::Precision { required: 3 }));
        assert_eq!(sheet.confirm(0), None);
        assert_eq!(sheet.cursor(), 0);
        assert_eq!(sheet.steps()[0].compliance(), Compliance::Unset);

        let notices = sheet.drain_notices();
        assert_eq!(notices[0].message, "3 or more decimal places required!");
    }

    #[test]
    fn reset_restores_initial_state()
    {
        let recorder = MemoryRecorder::default();
        let mut sheet = range_sheet().recorder(recorder.clone());

        sheet.set_input(0, "7.0").unwrap();
        sheet.confirm(0);
        sheet.confirm(1);
        sheet.reset();

        assert_eq!(sheet.cursor(), 0);
        for step in sheet.steps() {
            assert_eq!(step.compliance(), Compliance::Unset);
        }
        assert_eq!(sheet.steps()[0].input(), Some(""));
        assert_eq!(sheet.steps()[0].spec().map(|spec| spec.to_string()).as_deref(), Some("[5.50, 8.30]"));
        assert_eq!(recorder.last().steps[0].input.as_deref(), Some(""));
    }

    #[test]
    fn rejects_forward_capture_references()
    {
        let mut sheet = Sheet::new("refs");
        let capture = Capture::new(|args: &Args| args.text(0).map(str::to_owned)).step_arg(StepId::new(0));

        assert_eq!(
            sheet.observe("Echo", ObservationParams::new().capture(capture)),
            Err(SheetError::ForwardRef { step: 0, target: 0 })
        );
        assert!(sheet.is_empty());
    }

    #[tokio::test]
    async fn capture_fills_input_without_verdict()
    {
        let mut sheet = Sheet::new("capture");
        sheet.perform("Power on").unwrap();
        let reading = sheet.observe("Read", ObservationParams::new()
            .spec(Spec::range("[1, 2]").unwrap())
            .capture(Capture::new(|_: &Args| Ok::<_, CaptureError>("1.5")))
        ).unwrap();

        assert_eq!(sheet.capture(reading.index()).await.unwrap(), "1.5");
        assert_eq!(sheet.cursor(), 1);
        assert_eq!(sheet.step(reading).unwrap().input(), Some("1.5"));
        assert_eq!(sheet.step(reading).unwrap().compliance(), Compliance::Unset);
    }

    #[tokio::test]
    async fn failed_capture_leaves_step_alone()
    {
        let mut sheet = Sheet::new("capture");
        let reading = sheet.observe("Read", ObservationParams::new()
            .capture(Capture::new_async(|_: Args| async { Err::<String, _>("meter unplugged") }))
        ).unwrap();
        sheet.set_input(0, "1.1").unwrap();
        sheet.confirm(0);

        assert!(sheet.capture(reading.index()).await.is_err());
        assert_eq!(sheet.step(reading).unwrap().input(), Some("1.1"));
        assert_eq!(sheet.step(reading).unwrap().compliance(), Compliance::Pass);

        let notices = sheet.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Negative);
        assert_eq!(notices[0].message, "Automatic observation failed!\nmeter unplugged");
    }

    #[tokio::test]
    async fn capture_without_definition_warns()
    {
        let mut sheet = range_sheet();

        assert!(sheet.capture(0).await.is_err());
        assert!(sheet.capture(1).await.is_err());

        let notices = sheet.drain_notices();
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|notice| notice.level == NoticeLevel::Warning));
    }

    #[tokio::test]
    async fn capture_reads_earlier_steps()
    {
        let mean = |args: &Args| -> Result<String, CaptureError> {
            let mut sum = args.decimal(0)?;
            for index in 1..args.positional().len() {
                sum = sum.checked_add(args.decimal(index)?).ok_or_else(|| CaptureError::failed("overflow"))?;
            }
            let places = args.kwarg_int_or("places", 2)? as u32;
            sum.checked_div_int(args.positional().len() as u32, places)
                .map(|mean| mean.to_string())
                .ok_or_else(|| CaptureError::failed("no readings"))
        };

        let mut sheet = Sheet::new("mean");
        let a = sheet.observe("A", ObservationParams::new()).unwrap();
        let b = sheet.observe("B", ObservationParams::new()).unwrap();
        let c = sheet.observe("C", ObservationParams::new()).unwrap();
        let avg = sheet.observe("Mean", ObservationParams::new()
            .capture(Capture::new(mean).step_arg(a).step_arg(b).step_arg(c).kwarg("places", 3))
        ).unwrap();

        sheet.set_input(a.index(), "7.01").unwrap();
        sheet.set_input(b.index(), "7.02").unwrap();
        sheet.set_input(c.index(), "7.04").unwrap();

        assert_eq!(sheet.capture(avg.index()).await.unwrap(), "7.023");

        // an unfilled reading fails the capture rather than the session
        sheet.set_input(b.index(), "").unwrap();
        assert!(matches!(sheet.capture(avg.index()).await, Err(CaptureError::InvalidArg { .. })));
        assert_eq!(sheet.step(avg).unwrap().input(), Some("7.023"));
    }

    #[test]
    fn finish_writes_named_record()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = range_sheet();
        sheet.set_input(0, "7.25").unwrap();
        sheet.confirm(0);

        let path = sheet.finish(dir.path()).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("psu-acceptance_"));
        assert!(name.ends_with(".json"));

        let record = SheetRecord::read_from(&path).unwrap();
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[0].input.as_deref(), Some("7.25"));
        assert_eq!(sheet.drain_notices()[0].level, NoticeLevel::Positive);
    }
}
