use std::fmt::Display;
use std::io::{self, StdoutLock};
use std::time::Duration;

use clap::Parser;

use crossterm::event::{
    DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use tui_input::backend::crossterm::EventHandler;
use tui_input::Input;

use crate::artifact::ArtifactSlot;
use crate::openai::GptModel;
use crate::runner::{ExecOutcome, Runner, ShellInvoker};
use crate::settings::{Settings, DEFAULT_TIMEOUT_SECONDS};

const API_KEY_ERROR_TEXT: &str =
    "API Key hasn't been set. Set it with `aicmd config set api_key <key>`.";

#[derive(Parser)]
#[command(name = "aicmd")]
pub enum AicmdCLIArgs {
    /// Open the task prompt, generate a script and run it
    Run(RunArgs),
    /// Inspect and edit the persisted settings
    Config(ConfigArgs),
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum ArgModelKind {
    Gpt35Turbo,
    Gpt35Turbo16k,
}

impl From<ArgModelKind> for GptModel {
    fn from(value: ArgModelKind) -> Self {
        match value {
            ArgModelKind::Gpt35Turbo => Self::Gpt35Turbo,
            ArgModelKind::Gpt35Turbo16k => Self::Gpt35Turbo16k,
        }
    }
}

#[derive(clap::Args, Clone)]
#[command(author, version, about, long_about = None)]
pub struct RunArgs {
    /// Initial task text placed in the prompt
    task: Option<String>,

    #[arg(long, value_enum, default_value_t = ArgModelKind::Gpt35Turbo)]
    model: ArgModelKind,

    /// Print the last generated script to stdout on exit
    #[arg(long)]
    write_stdout: bool,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(clap::Subcommand)]
enum ConfigCommand {
    /// Show the current settings
    Show,
    /// Print a single settings value (api_key, timeout_seconds)
    Get { key: String },
    /// Change a settings value and persist it
    Set { key: String, value: String },
    /// Show the settings file path
    Path,
}

#[allow(clippy::missing_errors_doc)]
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    match AicmdCLIArgs::parse() {
        AicmdCLIArgs::Run(args) => {
            let mut ui = AicmdUI::new(args)?;
            ui.run().await?;
        }
        AicmdCLIArgs::Config(args) => run_config(&args)?,
    }
    Ok(())
}

fn run_config(args: &ConfigArgs) -> Result<(), Box<dyn std::error::Error>> {
    match &args.command {
        ConfigCommand::Show => {
            let settings = Settings::load()?;
            print!("{}", serde_yaml::to_string(&settings)?);
        }
        ConfigCommand::Get { key } => {
            let settings = Settings::load()?;
            match key.as_str() {
                "api_key" => println!("{}", settings.api_key),
                "timeout_seconds" => println!("{}", settings.timeout_seconds),
                other => return Err(format!("unknown settings key: {other}").into()),
            }
        }
        ConfigCommand::Set { key, value } => {
            let mut settings = Settings::load()?;
            match key.as_str() {
                "api_key" => settings.api_key = value.clone(),
                "timeout_seconds" => {
                    settings.timeout_seconds = value.parse()?;
                    if settings.clamp_timeout() {
                        eprintln!(
                            "Timeout must be greater than 0. \
                             Using the default of {DEFAULT_TIMEOUT_SECONDS} seconds."
                        );
                    }
                }
                other => return Err(format!("unknown settings key: {other}").into()),
            }
            settings.save()?;
            println!("Set {key}");
        }
        ConfigCommand::Path => println!("{}", Settings::config_path()?.display()),
    }
    Ok(())
}

enum RequestExit {
    Exit,
    Finished,
}

#[derive(Copy, Clone)]
enum RequestProgress {
    Waiting,
    S0,
    S1,
    S2,
    S3,
}

impl RequestProgress {
    const fn next_state(self) -> Self {
        match self {
            Self::Waiting | Self::S3 => Self::S0,
            Self::S0 => Self::S1,
            Self::S1 => Self::S2,
            Self::S2 => Self::S3,
        }
    }
}

impl Display for RequestProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, ""),
            Self::S0 => write!(f, "-"),
            Self::S1 => write!(f, "\\"),
            Self::S2 => write!(f, "|"),
            Self::S3 => write!(f, "/"),
        }
    }
}

#[derive(Clone, Copy)]
enum Controls {
    Started,
    Processing,
    Finished,
    MissingKey,
}

struct ResponseWindow<'t> {
    pub response: String,
    pub paragraph: Paragraph<'t>,
    fidget: RequestProgress,
}

impl ResponseWindow<'_> {
    fn update(&mut self, new: String, fidget: RequestProgress) {
        self.response = new.clone();
        self.paragraph = create_response_paragraph(new, fidget);
    }

    fn spin_fidget(&mut self) {
        self.fidget = self.fidget.next_state();
        self.update(self.response.clone(), self.fidget);
    }
}

fn create_response_paragraph<'t>(text: String, thinking: RequestProgress) -> Paragraph<'t> {
    let title = format!("aicmd {thinking}");
    Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(title))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: true })
}

fn create_input_paragraph<'t>(text: String, title: String) -> Paragraph<'t> {
    Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(title))
        .alignment(Alignment::Left)
}

fn create_controls_paragraph<'t>(state: Controls) -> Paragraph<'t> {
    let text = match state {
        Controls::Started | Controls::Finished => {
            "<C-c>: Exit | Enter: Generate & Run".to_string()
        }
        Controls::Processing => "<C-c>: Exit".to_string(),
        Controls::MissingKey => "<C-c>: Exit | Set the API key to enable runs".to_string(),
    };
    Paragraph::new(text)
        .block(Block::default().borders(Borders::TOP))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: true })
}

fn create_layout() -> ratatui::layout::Layout {
    ratatui::layout::Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(2),
        ])
}

pub struct AicmdUI<'t> {
    args: RunArgs,
    settings: Settings,
    runner: Runner<ShellInvoker>,
    term: Terminal<CrosstermBackend<StdoutLock<'t>>>,
    input_text: Paragraph<'t>,
    input: Input,
    response: ResponseWindow<'t>,
    controls: Paragraph<'t>,
    last_script: String,
}

impl<'t> AicmdUI<'t> {
    /// This function initializes the UI and eases disabling terminal raw mode
    /// in all circumstances
    fn initialization(args: RunArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = Settings::load()?;
        let slot = ArtifactSlot::default_location()?;
        let runner = Runner::new(args.model.into(), slot, ShellInvoker);

        let mut stdout = io::stdout().lock();
        crossterm::execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let term = Terminal::new(backend)?;

        let input_text = create_input_paragraph(String::new(), Self::title());
        let input = Input::default();
        let initial_response = if settings.api_key_set() {
            String::new()
        } else {
            API_KEY_ERROR_TEXT.to_string()
        };
        let response = ResponseWindow {
            response: initial_response.clone(),
            paragraph: create_response_paragraph(initial_response, RequestProgress::Waiting),
            fidget: RequestProgress::Waiting,
        };
        let controls = create_controls_paragraph(Controls::Started);

        Ok(AicmdUI {
            args,
            settings,
            runner,
            term,
            input_text,
            input,
            response,
            controls,
            last_script: String::new(),
        })
    }

    fn new(args: RunArgs) -> Result<Self, Box<dyn std::error::Error>> {
        enable_raw_mode().expect("Terminal needs to be set in raw mode for the aicmd UI to work");
        match Self::initialization(args) {
            Ok(ui) => Ok(ui),
            Err(err) => {
                disable_raw_mode()?;
                Err(err)
            }
        }
    }

    async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let cli_text = self.args.task.clone().unwrap_or_default();
        self.input = Input::new(cli_text.clone());
        self.input_text = create_input_paragraph(cli_text, Self::title());
        let result = self.mainloop().await;

        // restore terminal mode
        disable_raw_mode()?;
        crossterm::execute!(
            self.term.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        self.term.show_cursor()?;
        result?;

        if self.args.write_stdout && !self.last_script.is_empty() {
            println!("{}", self.last_script);
        }
        Ok(())
    }

    async fn mainloop(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let controls = if !self.settings.api_key_set() {
                Controls::MissingKey
            } else if self.response.response.is_empty() {
                Controls::Started
            } else {
                Controls::Finished
            };
            self.update_controls(controls);

            self.draw()?;

            if let Event::Key(key) = crossterm::event::read()? {
                match key {
                    KeyEvent {
                        code: KeyCode::Char('c'),
                        modifiers: KeyModifiers::CONTROL,
                        ..
                    } => return Ok(()),
                    KeyEvent {
                        code: KeyCode::Enter,
                        ..
                    } => {
                        // a run without a key or a task is rejected up front,
                        // before any request goes out
                        if self.settings.api_key_set() && !self.input.value().trim().is_empty() {
                            if matches!(self.send_request().await?, RequestExit::Exit) {
                                return Ok(());
                            }
                        }
                    }
                    _ => {
                        self.input.handle_event(&Event::Key(key));
                        self.input_text =
                            create_input_paragraph(self.input.value().to_string(), Self::title());
                    }
                }
            }
        }
    }

    fn draw(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.term.draw(|f| {
            let layout = create_layout();
            let chunks = layout.split(f.size());
            let width = chunks[0].width.max(3) - 3; // keep 2 for borders and 1 for cursor
            let scroll = self.input.visual_scroll(width as usize);
            f.render_widget(
                self.input_text
                    .clone()
                    .scroll((0, u16::try_from(scroll).unwrap_or_default())),
                chunks[0],
            );
            f.set_cursor(
                chunks[0].x
                    + u16::try_from(self.input.visual_cursor().max(scroll) - scroll)
                        .unwrap_or_default()
                    + 1,
                chunks[0].y + 1,
            );
            f.render_widget(self.response.paragraph.clone(), chunks[1]);
            f.render_widget(self.controls.clone(), chunks[2]);
        })?;
        Ok(())
    }

    /// Sends the task to the model, spinning the fidget while the request is
    /// in flight, then drives the reload handshake and shows the result.
    async fn send_request(&mut self) -> Result<RequestExit, Box<dyn std::error::Error>> {
        let runner = self.runner.clone();
        let settings = self.settings.clone();
        let task_text = self.input.value().to_string();
        let request_task =
            tokio::spawn(async move { runner.run(&task_text, &settings).await });

        self.response.update(String::new(), RequestProgress::Waiting);
        while !request_task.is_finished() {
            self.update_controls(Controls::Processing);
            self.draw()?;
            if crossterm::event::poll(Duration::from_millis(100))? {
                if let Event::Key(KeyEvent {
                    code: KeyCode::Char('c'),
                    modifiers: KeyModifiers::CONTROL,
                    ..
                }) = crossterm::event::read()?
                {
                    // stop the detached request so it cannot park a script
                    // in the slot while the process winds down
                    request_task.abort();
                    return Ok(RequestExit::Exit);
                }
                // no cancellation once the request is in flight; the
                // configured timeout is the only bound on a hung call
            }
            self.response.spin_fidget();
        }

        match request_task.await? {
            Ok(script) => {
                self.last_script = script.clone();
                let text = match self.runner.reload_complete() {
                    Some(ExecOutcome::Success { stdout }) => {
                        format!("{script}\n--- output ---\n{stdout}")
                    }
                    Some(ExecOutcome::Failed { detail }) => {
                        format!("{script}\n--- failed ---\n{detail}")
                    }
                    None => script,
                };
                self.response.update(text, RequestProgress::Waiting);
            }
            Err(err) => {
                self.response
                    .update(err.to_string(), RequestProgress::Waiting);
            }
        }
        Ok(RequestExit::Finished)
    }

    fn update_controls(&mut self, controls: Controls) {
        self.controls = create_controls_paragraph(controls);
    }

    fn title() -> String {
        "What should aicmd do?".to_string()
    }
}
