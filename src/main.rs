mod cli;

use anyhow::Result;
use clap::Parser;
use log::info;
use std::io::Write;
use std::sync::Arc;

use ramble_core::{
    logging, AppendTranscript, CpalCaptureSource, DictationManager, HttpTokenIssuer, SessionEvent,
    SessionSettings, WebSocketConnector,
};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = cli::Args::parse();

    let mut settings = SessionSettings {
        word_context: args.context.clone(),
        grace_period_ms: args.grace_ms,
        ..SessionSettings::default()
    };
    if !args.languages.is_empty() {
        settings.language_hints = args.languages.clone();
    }

    let issuer = Arc::new(HttpTokenIssuer::new(
        &args.backend,
        args.access_token.clone(),
        args.refresh_token.clone(),
    ));
    let (manager, mut events) = DictationManager::new(
        Arc::new(CpalCaptureSource::new()),
        issuer,
        Arc::new(WebSocketConnector),
        settings,
    );

    manager.start_recording()?;
    println!("Recording. Press Ctrl-C to stop.");

    let mut transcript = AppendTranscript::new();
    let mut stopping = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    SessionEvent::Connected => info!("connected to speech backend"),
                    SessionEvent::Error(error) => eprintln!("\nerror: {}", error),
                    SessionEvent::Disconnected => {
                        transcript.apply(&event);
                        break;
                    }
                    _ => {}
                }
                transcript.apply(&event);
                render(&transcript);
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                manager.stop_recording();
            }
        }
    }

    println!("\n\n{}", transcript.display().trim_end());
    Ok(())
}

fn render(transcript: &AppendTranscript) {
    print!("\r\x1b[2K{}", transcript.display());
    let _ = std::io::stdout().flush();
}
