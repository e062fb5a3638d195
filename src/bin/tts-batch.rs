use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tts_server::{
    engines::remote::load_backend,
    speakers::SpeakerStore,
    synthesis::{SynthesisRequestBuilder, Synthesizer, VoiceSource},
};

#[derive(Parser, Debug)]
#[command(name = "tts-batch")]
#[command(about = "Register speakers and synthesize to WAV files without the HTTP server")]
struct Args {
    /// Directory holding model.json and an optional lexicon.json
    #[arg(long, env = "MODEL_PATH", default_value = "models", global = true)]
    model_dir: PathBuf,

    /// Speaker archive read and written by every command
    #[arg(long, default_value = "speakers.zip", global = true)]
    speaker_cache: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or replace a speaker in the cache
    AddSpeaker {
        #[arg(long)]
        spk_id: String,
        #[arg(long)]
        prompt_audio: PathBuf,
        /// Transcribed with the configured worker when omitted
        #[arg(long)]
        prompt_text: Option<String>,
    },
    /// Synthesize text with a cached speaker
    Synthesize {
        #[arg(long)]
        spk_id: String,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "results/output.wav")]
        output: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        speed: f32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let backend = load_backend(&args.model_dir)?;
    let frontend = backend.frontend();
    let store = Arc::new(SpeakerStore::new(frontend.clone(), backend.transcriber.clone()));
    if args.speaker_cache.exists() {
        store.load(&args.speaker_cache)?;
    }

    match args.command {
        Command::AddSpeaker {
            spk_id,
            prompt_audio,
            prompt_text,
        } => {
            let profile = store.add_from_file(&spk_id, &prompt_audio, prompt_text.as_deref())?;
            store.save(&args.speaker_cache)?;
            println!(
                "Speaker {} added ({}), cache has {} speakers",
                profile.id,
                profile.phonetic_transcript,
                store.len()
            );
        }
        Command::Synthesize {
            spk_id,
            text,
            output,
            speed,
        } => {
            let synthesizer = Synthesizer::new(backend.model.clone(), frontend, store);
            let request = SynthesisRequestBuilder::default()
                .text(text)
                .voice(VoiceSource::Speaker(spk_id))
                .speed(speed)
                .build()?;

            let synth_start = Instant::now();
            let result = synthesizer.synthesize_blocking(request)?;
            let synth_dur = synth_start.elapsed();

            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            result.write_wav(&output)?;
            println!(
                "Synthesized {:.2}s audio in {:.2?}, saved to {}",
                result.duration_secs(),
                synth_dur,
                output.display()
            );
        }
    }
    Ok(())
}
