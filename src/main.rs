//! Terminal front-end: walks an operator through a sheet, one command per line

use std::{
    io::Write,
    path::PathBuf,
    sync::Arc,
};
use benchsheet::{
    config::Config,
    instrument::{ self, Bk5492, Measurement },
    Args, Capture, CaptureError, Compliance, Instrument, Notice, NoticeLevel, ObservationParams,
    JsonFileRecorder, Sheet, SheetError, Spec, Step,
};
use chrono::Local;
use clap::Parser;
use env_logger::Env;
use log::{ error, info };
use tokio::io::{ AsyncBufReadExt, BufReader };

#[derive(Parser, Debug, Clone)]
#[command(name = "benchsheet", version, about = "Run a bench test sheet from the terminal")]
struct Cli
{
    /// Path to the bench configuration TOML
    #[arg(long, default_value = "benchsheet.toml")]
    config: PathBuf,

    /// Directory for run records; overrides the config file
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// env_logger-style filter string (e.g. "info,benchsheet=debug"); overrides RUST_LOG/defaults
    #[arg(long)]
    log_filter: Option<String>,

    /// Print the serial ports on this machine and exit
    #[arg(long)]
    list_ports: bool,
}

const DEFAULT_LOG_FILTER: &str = "warn,benchsheet=info";

fn init_logging(cli_filter: Option<&str>)
{
    let env = Env::default().default_filter_or(DEFAULT_LOG_FILTER);
    let mut builder = env_logger::Builder::from_env(env);

    if let Some(filter) = cli_filter {
        builder.parse_filters(filter);
    }

    builder.format(|buf, record| {
        let ts = buf.timestamp_seconds();
        writeln!(buf, "[{} {:<5} {}] {}", ts, record.level(), record.target(), record.args())
    });
    builder.init();
}

/// One line of operator input
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command
{
    /// Plain text: fill in the focused step and commit it
    Enter(String),
    Pass,
    Fail,
    Capture,
    Up,
    Down,
    Goto(usize),
    Note(String),
    DeleteNote,
    Reset,
    Test,
    Finish,
    Show,
    Quit,
}

impl Command
{
    fn parse(line: &str) -> Result<Self, String>
    {
        let line = line.trim();

        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Self::Enter(line.to_owned()));
        };

        let (word, arg) = match rest.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (rest, ""),
        };

        match word {
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "capture" => Ok(Self::Capture),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "goto" => match arg.parse::<usize>() {
                Ok(number) if number > 0 => Ok(Self::Goto(number - 1)),
                _ => Err(format!("expected a step number, got {:?}", arg)),
            },
            "note" if !arg.is_empty() => Ok(Self::Note(arg.to_owned())),
            "note" => Err("expected note text".to_owned()),
            "delnote" => Ok(Self::DeleteNote),
            "reset" => Ok(Self::Reset),
            "test" => Ok(Self::Test),
            "finish" => Ok(Self::Finish),
            "show" => Ok(Self::Show),
            "quit" | "q" => Ok(Self::Quit),
            other => Err(format!("unknown command :{}", other)),
        }
    }
}

/// Mean of the positional readings, to `places` decimal places
fn mean(args: &Args) -> Result<String, CaptureError>
{
    let count = args.positional().len();
    let mut sum = args.decimal(0)?;

    for index in 1..count {
        sum = sum
            .checked_add(args.decimal(index)?)
            .ok_or_else(|| CaptureError::failed("sum of readings overflowed"))?;
    }

    let places = args.kwarg_int_or("places", 2)?;
    let places = u32::try_from(places).map_err(|_| CaptureError::failed("places must not be negative"))?;

    sum.checked_div_int(count as u32, places)
        .map(|mean| mean.to_string())
        .ok_or_else(|| CaptureError::failed("mean overflowed"))
}

fn today(_: &Args) -> Result<String, CaptureError>
{
    Ok(Local::now().format("%m/%d/%Y").to_string())
}

/// The bench procedure, using `dmm` for readings when one is configured
fn build_sheet(dmm: Option<&Arc<Bk5492>>) -> Result<Sheet, SheetError>
{
    let reading = |measurement: Measurement| -> ObservationParams {
        match dmm {
            Some(dmm) => ObservationParams::new().capture(dmm.capture(measurement)),
            None => ObservationParams::new(),
        }
    };

    let mut sheet = Sheet::new("PSU-100 acceptance").version("C");

    sheet.observe("(1.1) Record operator name", ObservationParams::new().spec(Spec::Any))?;
    sheet.observe("(1.2) Record today's date", ObservationParams::new()
        .spec(Spec::Date)
        .capture(Capture::new(today))
    )?;
    sheet.observe("(1.3) Record part number", ObservationParams::new().spec(Spec::Any))?;
    sheet.observe("(1.4) Record serial number", ObservationParams::new().spec(Spec::Any))?;
    sheet.perform("(2.1) Set POWER switch to ON")?;
    let first = sheet.observe("(2.2) Measure DC voltage across R1", reading(Measurement::Vdc)
        .unit("V")
        .spec(Spec::range("[5.50, 8.30]")?)
        .min_decimal_places(2)
    )?;
    sheet.observe("(2.3) Measure AC ripple at TP3", reading(Measurement::MilliVac)
        .unit("mV")
        .spec(Spec::range("[0, 50)")?)
    )?;
    let second = sheet.observe("(2.4) Repeat DC voltage across R1 after 1 minute", reading(Measurement::Vdc)
        .unit("V")
        .spec(Spec::range("[5.50, 8.30]")?)
        .min_decimal_places(2)
    )?;
    sheet.observe("(2.5) Mean DC voltage across R1", ObservationParams::new()
        .unit("V")
        .spec(Spec::range("[6.00, 8.00]")?)
        .capture(Capture::new(mean).step_arg(first).step_arg(second).kwarg("places", 3))
    )?;
    sheet.perform("(2.6) Set POWER switch to OFF")?;

    Ok(sheet)
}

fn show_step(index: usize, step: &Step, focused: bool)
{
    let marker = if focused { ">" } else { " " };
    let reference = step.reference().map(|r| format!("({}) ", r)).unwrap_or_default();

    let mut line = format!("{} {:>2}. {}{}", marker, index + 1, reference, step.procedure());

    if step.is_observation() {
        let spec = step.spec().map(|spec| format!(" [{}]", spec)).unwrap_or_default();
        let unit = step.unit().map(|unit| format!(" {}", unit)).unwrap_or_default();
        line.push_str(&format!("{}: {}{}", spec, step.input().unwrap_or_default(), unit));
    }

    match step.compliance() {
        Compliance::Unset => (),
        verdict => line.push_str(&format!(" .. {}", verdict)),
    }

    if let Some(note) = step.note() {
        line.push_str(&format!("\n       note: {}", note));
    }

    println!("{}", line);
}

fn show_sheet(sheet: &Sheet)
{
    println!("{}", sheet.title());

    for (index, step) in sheet.steps().iter().enumerate() {
        show_step(index, step, index == sheet.cursor());
    }
}

fn show_notices(notices: Vec<Notice>)
{
    for notice in notices {
        let tag = match notice.level {
            NoticeLevel::Positive => "ok",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Negative => "error",
        };

        println!("[{}] {}", tag, notice.message);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main()
{
    let cli = Cli::parse();
    init_logging(cli.log_filter.as_deref());

    if let Err(err) = run(cli).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    if cli.list_ports {
        for port in instrument::list_ports()? {
            println!("{}\t{}", port.device, port.description);
        }
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir.clone());
    let meters: Vec<Arc<Bk5492>> = config.instruments.iter().map(|instrument| instrument.connect()).collect();

    let mut sheet = build_sheet(meters.first())?.recorder(JsonFileRecorder::in_dir(&data_dir));
    for meter in &meters {
        sheet.instrument(Arc::clone(meter) as Arc<dyn Instrument>);
    }

    info!("{} instruments configured, recording to {}", meters.len(), data_dir.display());
    show_sheet(&sheet);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("[warning] {}", err);
                continue;
            },
        };

        let cursor = sheet.cursor();

        match command {
            Command::Enter(text) => {
                if !text.is_empty() {
                    if let Err(err) = sheet.set_input(cursor, &text) {
                        println!("[warning] {}", err);
                        continue;
                    }
                }
                sheet.confirm(cursor);
            },
            Command::Pass => { sheet.toggle_compliance(cursor, Compliance::Pass); },
            Command::Fail => { sheet.toggle_compliance(cursor, Compliance::Fail); },
            Command::Capture => { let _ = sheet.capture(cursor).await; },
            Command::Up => { sheet.go_back(); },
            Command::Down => { sheet.advance(); },
            Command::Goto(index) => sheet.focus_step(index),
            Command::Note(note) => sheet.set_note(cursor, &note),
            Command::DeleteNote => sheet.delete_note(cursor),
            Command::Reset => sheet.reset(),
            Command::Test => sheet.test_connections().await,
            Command::Finish => {
                if let Err(err) = sheet.finish(&data_dir) {
                    error!("failed to save {}: {}", sheet.title(), err);
                    println!("[error] {}", err);
                }
            },
            Command::Show => show_sheet(&sheet),
            Command::Quit => break,
        }

        show_notices(sheet.drain_notices());

        if let Some(step) = sheet.current() {
            show_step(sheet.cursor(), step, true);
        }
    }

    Ok(())
}
