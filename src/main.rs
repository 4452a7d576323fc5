use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voxloop::audio::{
    AudioCapture, AudioFrame, FRAME_SAMPLES, FrameAssembler, SAMPLE_RATE, read_wav,
};
use voxloop::conversation::{Orchestrator, OrchestratorSettings, Status};
use voxloop::llm::{OllamaBackend, SamplingParams};
use voxloop::speech::{AudioClip, AudioSink, CpalPlayback, OpenAiSynthesizer, SpeechQueue};
use voxloop::stt::{TranscriptionService, WhisperTranscriber};
use voxloop::tools::{BuiltinTools, McpHttpBackend, ToolDispatcher};
use voxloop::vad::{
    EnergyModel, SpeechModel, VadEngine, VadEvent, calculate_energy, spawn_vad_worker,
};
use voxloop::{Config, VoiceAssistant};

/// Frames buffered between the capture callback and the VAD worker
const CAPTURE_QUEUE: usize = 256;

/// Voxloop - hands-free voice assistant
#[derive(Parser)]
#[command(name = "voxloop", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "VOXLOOP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live voice assistant
    Run,
    /// Chat with the assistant over stdin
    Chat,
    /// Run voice activity detection over a WAV file
    Vad {
        /// Path to a WAV file
        path: PathBuf,
    },
    /// List active tools
    Tools,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voxloop=info",
        1 => "info,voxloop=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_assistant(config).await,
        Command::Chat => chat(config).await,
        Command::Vad { path } => vad_file(&config, &path),
        Command::Tools => list_tools(&config).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Dispatcher over the built-in tools and every configured MCP server
fn build_dispatcher(config: &Config) -> ToolDispatcher {
    let mut dispatcher =
        ToolDispatcher::new().with_backend(Arc::new(BuiltinTools::new(&config.tools.builtin)));
    for server in &config.tools.mcp {
        tracing::debug!(id = %server.id, url = %server.url, "adding mcp server");
        dispatcher.add_backend(Arc::new(McpHttpBackend::new(server)));
    }
    dispatcher
}

/// Orchestrator with a loaded conversation
async fn build_orchestrator(config: &Config) -> anyhow::Result<Arc<Orchestrator>> {
    let backend = Arc::new(OllamaBackend::new(&config.llm));
    let tools = Arc::new(build_dispatcher(config));
    let settings =
        OrchestratorSettings::new(&config.conversation, SamplingParams::from(&config.llm));
    let orchestrator = Arc::new(Orchestrator::new(backend, tools, settings));

    let progress = orchestrator.subscribe_status(|status| match status {
        Status::ModelLoading { progress } => {
            tracing::info!(progress = %format!("{:.0}%", progress * 100.0), "loading model");
        }
        Status::Error(message) => tracing::error!(error = %message, "assistant error"),
        other => tracing::debug!(status = ?other, "status changed"),
    });

    orchestrator.create_conversation(false).await?;
    progress.unsubscribe();

    tracing::info!(model = %config.llm.model, "conversation ready");
    Ok(orchestrator)
}

/// Live loop: microphone, VAD, STT, LLM, speech
#[allow(clippy::future_not_send)]
async fn run_assistant(config: Config) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config).await?;

    let stt = TranscriptionService::new(WhisperTranscriber::new(&config.stt)).spawn();

    let speech = if config.voice.speak {
        let synthesizer = Arc::new(OpenAiSynthesizer::new(&config.tts));
        let sink = Arc::new(CpalPlayback::new()?);
        Some(SpeechQueue::new(synthesizer, sink))
    } else {
        tracing::info!("speech output disabled");
        None
    };

    let (vad, events) = spawn_vad_worker(config.vad.clone(), || {
        Ok(Box::new(EnergyModel::default()) as Box<dyn SpeechModel>)
    })?;

    // cpal streams aren't Send, so capture stays on this task
    let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(CAPTURE_QUEUE);
    let mut capture = AudioCapture::new()?;
    capture.start(frame_tx)?;

    let forward = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if vad.push(frame).await.is_err() {
                tracing::warn!("vad worker stopped, no longer forwarding audio");
                break;
            }
        }
    });

    let assistant = VoiceAssistant::new(
        Arc::clone(&orchestrator),
        stt,
        speech.clone(),
        config.voice.barge_in,
    );

    let result = tokio::select! {
        result = assistant.run(events) => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };

    capture.stop();
    forward.abort();
    if let Some(speech) = &speech {
        speech.interrupt();
    }
    orchestrator.shutdown().await;

    result
}

/// Text-only conversation over stdin
async fn chat(config: Config) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type a message, or an empty line to quit.\n");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let outcome = orchestrator
            .submit_user_turn(line, |sentence| println!("  {sentence}"))
            .await;

        match outcome {
            Ok(outcome) => {
                if outcome.tool_calls > 0 {
                    println!("  ({} tool calls in {} rounds)", outcome.tool_calls, outcome.rounds);
                }
                if outcome.conversation_ended {
                    println!("\n--- conversation ended, starting a new one ---\n");
                }
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Run the VAD engine over a WAV file and print what it finds
fn vad_file(config: &Config, path: &Path) -> anyhow::Result<()> {
    let (samples, sample_rate) = read_wav(path)?;
    println!(
        "{}: {} samples at {sample_rate} Hz",
        path.display(),
        samples.len()
    );

    let mut assembler = FrameAssembler::new(sample_rate)?;
    let frames = assembler.push(&samples)?;

    let mut engine = VadEngine::new(config.vad.clone(), Box::new(EnergyModel::default()))?;
    let mut segments = 0usize;

    for frame in frames {
        for event in engine.process(&frame.samples)? {
            match event {
                VadEvent::SpeechStart => println!("speech start"),
                VadEvent::SpeechEnd => println!("speech end"),
                VadEvent::SpeechChunk(segment) => {
                    segments += 1;
                    println!(
                        "  segment {segments}: {:.2}s - {:.2}s ({:.2}s, {} samples)",
                        segment.start.as_secs_f32(),
                        segment.end.as_secs_f32(),
                        segment.duration.as_secs_f32(),
                        segment.samples.len()
                    );
                }
                VadEvent::Ready | VadEvent::Error(_) => {}
            }
        }
    }

    if engine.buffered_samples() > 0 {
        #[allow(clippy::cast_precision_loss)]
        let seconds = engine.buffered_samples() as f32 / SAMPLE_RATE as f32;
        println!("(recording still open at end of file: {seconds:.2}s buffered)");
    }
    println!("---\n{segments} segments");
    Ok(())
}

/// Print the tools the assistant can call
async fn list_tools(config: &Config) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config);
    let tools = dispatcher.list_active_tools().await;

    if tools.is_empty() {
        println!("No tools available");
        return Ok(());
    }

    for tool in tools {
        println!("{}", tool.name);
        println!("  {}", tool.description);
        println!("  parameters: {}", serde_json::to_string(&tool.parameters)?);
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (frame_tx, mut frame_rx) = mpsc::channel::<AudioFrame>(CAPTURE_QUEUE);
    let mut capture = AudioCapture::new()?;
    capture.start(frame_tx)?;

    println!(
        "Device rate: {} Hz, frames of {FRAME_SAMPLES} at {SAMPLE_RATE} Hz",
        capture.device_sample_rate()
    );
    println!("---");

    let mut model = EnergyModel::default();
    for i in 0..duration {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        let mut samples = Vec::new();
        let mut max_probability = 0.0f32;

        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frame_rx.recv()).await {
            max_probability = max_probability.max(model.predict(&frame.samples)?);
            samples.extend(frame.samples);
        }

        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | Speech: {:.2} | [{}]",
            i + 1,
            energy,
            peak,
            max_probability,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = CpalPlayback::new()?;
    println!("Output device: {}", playback.device_name());
    let clip = AudioClip::tone(440.0, Duration::from_secs(2), 24_000);

    println!("Playing {} samples at {} Hz...", clip.samples.len(), clip.sample_rate);
    playback.play(clip, &CancellationToken::new()).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}
