//! **Bench** test **sheet**s: step-by-step procedures with spec checks and instrument capture
//!
//! A [`Sheet`] holds an ordered procedure. Each step is either a plain action to perform or an
//! observation to record, optionally checked against a [`Spec`] and optionally filled in
//! automatically by a [`Capture`], e.g. a reading from a [`Bk5492`](instrument::Bk5492)
//! multimeter over RS232. Every verdict is written through to a [`Recorder`] as it happens.
//!
//! ```
//! use benchsheet::{ Compliance, ObservationParams, Sheet, Spec };
//!
//! let mut sheet = Sheet::new("PSU acceptance");
//! sheet.observe("(1.2) Measure voltage of R1", ObservationParams::new()
//!     .unit("V")
//!     .spec(Spec::range("[5.50, 8.30]").unwrap())
//! ).unwrap();
//! sheet.perform("(1.3) Set POWER switch to OFF").unwrap();
//!
//! sheet.set_input(0, "7.0").unwrap();
//! assert_eq!(sheet.confirm(0), Some(Compliance::Pass));
//! assert_eq!(sheet.cursor(), 1);
//! ```

pub mod decimal;
pub mod specs;
pub mod capture;
pub mod step;
pub mod record;
pub mod sheet;
pub mod instrument;
pub mod config;

pub use decimal::{ Decimal, ParseDecimalError };
pub use specs::{ RangeSpec, Spec, SpecError };
pub use capture::{ Args, Capture, CaptureError, CaptureResult };
pub use step::{ Compliance, ObservationParams, Step, StepError, StepId, StepKind };
pub use record::{ JsonFileRecorder, NullRecorder, RecordError, Recorder, SheetRecord, StepRecord };
pub use sheet::{ extract_ref, Notice, NoticeLevel, Sheet, SheetError };
pub use instrument::{ Instrument, InstrumentError };
pub use config::{ Config, ConfigError };
