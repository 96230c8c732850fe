use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Args, Parser, Subcommand};
use persona_contracts::characters::{Character, ImagePayload};
use persona_contracts::events::EventWriter;
use persona_engine::{
    build_orchestrator, EngineConfig, GenerationOrchestrator, GenerationUpdate, RequestState,
};
use rand::seq::SliceRandom;

mod render;

#[derive(Debug, Parser)]
#[command(name = "persona", version, about = "PersonaAI character studio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct EngineArgs {
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    engine: EngineArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    engine: EngineArgs,
}

const RANDOM_PROMPTS: [&str; 6] = [
    "미래 도시의 사이버펑크 해커",
    "숲을 지키는 고대 엘프 수호자",
    "우주를 여행하는 현상금 사냥꾼",
    "저주받은 갑옷을 입은 기사",
    "말하는 고양이 마법사",
    "스팀펑크 스타일의 발명가",
];

const CHAT_HELP: &str = "\
commands:
  <text>              generate a character from a description
  /random             generate from a random suggestion
  /list               show the gallery, newest first
  /show <n>           show character n in detail
  /save <n> <path>    write character n's portrait to a file
  /wait               wait for outstanding generations
  /error              show the last generation error
  /help               show this help
  /quit               leave the session";

const INPUT_POLL: Duration = Duration::from_millis(200);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("persona error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
    }
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    EngineConfig::from_env().with_overrides(
        args.text_model.clone(),
        args.image_model.clone(),
        args.timeout,
    )
}

fn open_orchestrator(config: &EngineConfig, args: &EngineArgs) -> Result<GenerationOrchestrator> {
    let session_id = format!("session-{}", uuid::Uuid::new_v4().simple());
    let events = match args.events.as_ref() {
        Some(path) => EventWriter::new(path, session_id),
        None => EventWriter::disabled(session_id),
    };
    if let Some(path) = events.path() {
        eprintln!("{}", render::dim(&format!("events: {}", path.display())));
    }
    build_orchestrator(config, events)
}

/// Upper bound for both stages of one generation.
fn settle_budget(config: &EngineConfig) -> Duration {
    Duration::from_secs_f64(config.request_timeout_s * 2.0 + 10.0)
}

fn run_once(args: RunArgs) -> Result<i32> {
    let config = engine_config(&args.engine);
    let mut orchestrator = open_orchestrator(&config, &args.engine)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    generate_once(
        &mut orchestrator,
        &args.prompt,
        args.json,
        settle_budget(&config),
        &mut out,
    )
}

/// Exit code 0 once a profile exists, even without a portrait.
fn generate_once(
    orchestrator: &mut GenerationOrchestrator,
    prompt: &str,
    json: bool,
    budget: Duration,
    out: &mut impl Write,
) -> Result<i32> {
    let request = orchestrator.submit(prompt)?;
    let updates = orchestrator.settle(budget);
    log_image_failures(&updates);

    let state = orchestrator
        .request_state(request)
        .cloned()
        .context("generation request vanished")?;
    if let RequestState::ProfileFailed { message } = &state {
        eprintln!("{message}");
        return Ok(1);
    }
    let Some(character) = state
        .character_id()
        .and_then(|id| orchestrator.gallery().get(id))
    else {
        eprintln!("persona: profile generation timed out");
        return Ok(1);
    };

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(character)?)?;
    } else {
        write!(out, "{}", render::detail(character))?;
    }
    if !state.is_settled() {
        eprintln!("persona: portrait still pending at exit");
    }
    Ok(0)
}

enum ChatFlow {
    Continue,
    Quit,
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = engine_config(&args.engine);
    let mut orchestrator = open_orchestrator(&config, &args.engine)?;
    println!(
        "PersonaAI · text {} · image {}",
        orchestrator.text_model(),
        orchestrator.image_model()
    );
    println!("상상 속의 캐릭터를 설명해 주세요. /help for commands.");

    let lines = spawn_stdin_reader()?;
    print_input_marker();
    loop {
        match lines.recv_timeout(INPUT_POLL) {
            Ok(line) => {
                match handle_chat_line(&mut orchestrator, &config, &line) {
                    Ok(ChatFlow::Quit) => break,
                    Ok(ChatFlow::Continue) => {}
                    Err(err) => println!("{err:#}"),
                }
                print_input_marker();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        let updates = orchestrator.poll();
        if !updates.is_empty() {
            report_updates(&orchestrator, &updates);
            print_input_marker();
        }
    }

    if orchestrator.in_flight() > 0 {
        println!(
            "leaving with {} generation(s) still running.",
            orchestrator.in_flight()
        );
    }
    Ok(())
}

fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("persona-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("stdin reader spawn failed")?;
    Ok(rx)
}

fn print_input_marker() {
    print!("> ");
    let _ = io::stdout().flush();
}

fn handle_chat_line(
    orchestrator: &mut GenerationOrchestrator,
    config: &EngineConfig,
    line: &str,
) -> Result<ChatFlow> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(ChatFlow::Continue);
    }
    if !trimmed.starts_with('/') {
        submit_prompt(orchestrator, trimmed)?;
        return Ok(ChatFlow::Continue);
    }

    let words = shell_words::split(trimmed).context("could not parse command")?;
    let args = words.iter().skip(1).map(String::as_str).collect::<Vec<&str>>();
    match words.first().map(String::as_str).unwrap_or_default() {
        "/quit" | "/exit" => return Ok(ChatFlow::Quit),
        "/help" => println!("{CHAT_HELP}"),
        "/list" => println!("{}", render::gallery(orchestrator.gallery())),
        "/show" => {
            let character = character_at(orchestrator, args.first().copied())?;
            print!("{}", render::detail(character));
        }
        "/save" => {
            let character = character_at(orchestrator, args.first().copied())?;
            let Some(path) = args.get(1) else {
                bail!("usage: /save <n> <path>");
            };
            save_portrait(character, Path::new(path))?;
            println!("saved {}'s portrait to {path}", character.name);
        }
        "/random" => {
            let prompt = RANDOM_PROMPTS
                .choose(&mut rand::thread_rng())
                .copied()
                .unwrap_or(RANDOM_PROMPTS[0]);
            println!("🎲 {prompt}");
            submit_prompt(orchestrator, prompt)?;
        }
        "/wait" => {
            let updates = orchestrator.settle(settle_budget(config));
            if updates.is_empty() && orchestrator.in_flight() == 0 {
                println!("nothing in progress.");
            }
            report_updates(orchestrator, &updates);
        }
        "/error" => match orchestrator.error() {
            Some(message) => println!("{message}"),
            None => println!("no error."),
        },
        other => bail!("unknown command {other}; try /help"),
    }
    Ok(ChatFlow::Continue)
}

fn submit_prompt(orchestrator: &mut GenerationOrchestrator, prompt: &str) -> Result<()> {
    if orchestrator.is_busy() {
        println!("아직 이전 캐릭터를 생성 중입니다. 잠시만 기다려 주세요.");
        return Ok(());
    }
    orchestrator.submit(prompt)?;
    println!("생성 중: {prompt}");
    Ok(())
}

fn character_at<'a>(
    orchestrator: &'a GenerationOrchestrator,
    raw: Option<&str>,
) -> Result<&'a Character> {
    let Some(raw) = raw else {
        bail!("which character? give its number from /list");
    };
    let number = raw
        .parse::<usize>()
        .with_context(|| format!("'{raw}' is not a character number"))?;
    number
        .checked_sub(1)
        .and_then(|idx| orchestrator.gallery().characters().get(idx))
        .with_context(|| format!("no character #{number}"))
}

fn save_portrait(character: &Character, path: &Path) -> Result<()> {
    let Some(url) = character.image_url.as_deref() else {
        bail!("{} has no portrait", character.name);
    };
    let payload = ImagePayload::from_data_url(url)
        .with_context(|| format!("{}'s portrait is not an inline image", character.name))?;
    let bytes = BASE64
        .decode(payload.data_base64.as_bytes())
        .context("portrait base64 decode failed")?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn report_updates(orchestrator: &GenerationOrchestrator, updates: &[GenerationUpdate]) {
    let gallery = orchestrator.gallery();
    for update in updates {
        match update {
            GenerationUpdate::CharacterAdded { character_id, .. } => {
                if let (Some(idx), Some(character)) =
                    (gallery.position(*character_id), gallery.get(*character_id))
                {
                    println!("\n{}", render::card(idx + 1, character));
                }
            }
            GenerationUpdate::ProfileFailed { message, .. } => println!("\n오류: {message}"),
            GenerationUpdate::ImageReady { character_id, .. } => {
                if let (Some(idx), Some(character)) =
                    (gallery.position(*character_id), gallery.get(*character_id))
                {
                    println!("\n[{}] {}: portrait ready", idx + 1, character.name);
                }
            }
            GenerationUpdate::ImageFailed { .. } => {}
        }
    }
    log_image_failures(updates);
}

fn log_image_failures(updates: &[GenerationUpdate]) {
    for update in updates {
        if let GenerationUpdate::ImageFailed {
            character_id,
            reason,
            ..
        } = update
        {
            eprintln!(
                "{}",
                render::dim(&format!(
                    "[persona] image generation failed for {character_id}: {reason}"
                ))
            );
        }
    }
}
