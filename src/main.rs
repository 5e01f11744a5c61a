use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lingo_live::{
    tutor, CaptureConfig, Config, Conversation, ConversationConfig, CpalCapture, CpalPlayback,
    GeminiConnector, Language, Proficiency, SessionNotice, Speaker,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "lingo-live",
    about = "Practice a language by voice with a live tutor",
    version
)]
struct Cli {
    /// Language to practice
    #[arg(short, long, value_enum, default_value_t = Language::Spanish)]
    language: Language,

    /// Your proficiency level
    #[arg(short = 'p', long, value_enum, default_value_t = Proficiency::Beginner)]
    level: Proficiency,

    /// Conversation scenario (see --list-scenarios)
    #[arg(short, long, default_value = "casual_chat")]
    scenario: String,

    /// Path to a config file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<String>,

    /// List available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if cli.list_scenarios {
        for scenario in &tutor::SCENARIOS {
            println!("{:<20} {} - {}", scenario.id, scenario.name, scenario.description);
        }
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    info!("Lingo Live v0.1.0");
    info!("Loaded config: {}", cfg.service.name);

    let api_key = std::env::var("GEMINI_API_KEY")
        .context("GEMINI_API_KEY is not set; export your API key to start a conversation")?;

    let scenario = tutor::find_scenario(&cli.scenario).with_context(|| {
        format!(
            "unknown scenario '{}'; run with --list-scenarios to see the options",
            cli.scenario
        )
    })?;
    let system_instruction = tutor::system_instruction(cli.language, cli.level, scenario);

    let config = ConversationConfig {
        model: cfg.service.model.clone(),
        voice: cfg.service.voice.clone(),
        system_instruction,
        capture_sample_rate: cfg.audio.capture_sample_rate,
        playback_sample_rate: cfg.audio.playback_sample_rate,
        frame_samples: cfg.audio.frame_samples,
        ..Default::default()
    };

    let connector = Arc::new(GeminiConnector::new(&cfg.service.endpoint, &api_key));
    let capture = Box::new(CpalCapture::new(CaptureConfig {
        sample_rate: cfg.audio.capture_sample_rate,
        channels: cfg.audio.channels,
        frame_samples: cfg.audio.frame_samples,
    }));
    let playback = Box::new(CpalPlayback::new());

    let conversation = Conversation::new(config, connector, capture, playback);
    let mut notices = conversation
        .take_notices()
        .context("notice stream already taken")?;

    conversation.start().await?;

    println!(
        "Practicing {} ({}) in scenario: {}",
        cli.language, cli.level, scenario.name
    );
    println!("Speak into your microphone. Press Ctrl-C to end.");
    println!();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("Interrupt received, ending conversation");
                break;
            }
            notice = notices.recv() => match notice {
                Some(SessionNotice::Transcript(entry)) => {
                    let who = match entry.speaker {
                        Speaker::User => "you",
                        Speaker::Assistant => "tutor",
                    };
                    println!("[{}] {}", who, entry.text);
                }
                Some(SessionNotice::Error { message }) => {
                    eprintln!("session error: {}", message);
                }
                Some(SessionNotice::Ended { .. }) | None => break,
            },
        }
    }

    conversation.end().await?;

    let turns = conversation.transcript().len();
    info!("Conversation over after {} transcript entries", turns);

    Ok(())
}
