use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tts_server::{
    engines::remote::load_backend,
    server::{self, AppContext},
    speakers::SpeakerStore,
    synthesis::Synthesizer,
    ReferenceAudio,
};

const DEFAULT_PROMPT_TEXT: &str = "在密碼學中，加密是將明文資訊改變為難以讀取的密文內容，使之不可讀的方法。只有擁有解密方法的對象，經由解密過程，才能將密文還原為正常可讀的內容。";

#[derive(Parser, Debug)]
#[command(name = "tts-server")]
#[command(about = "HTTP API server with cached speaker profiles and zero-shot voice cloning")]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 50000)]
    port: u16,

    /// Directory holding model.json and an optional lexicon.json
    #[arg(long, env = "MODEL_PATH", default_value = "models")]
    model_dir: PathBuf,

    /// Require `Authorization: Bearer <key>` when set
    #[arg(long, env = "API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Reference clip of the default /audio/speech voice
    #[arg(long, env = "SPEAKER_PROMPT_AUDIO_PATH", default_value = "./data/example.wav")]
    prompt_audio: PathBuf,

    /// Transcript of the default voice's reference clip
    #[arg(long, env = "SPEAKER_PROMPT_TEXT_TRANSCRIPTION", default_value = DEFAULT_PROMPT_TEXT)]
    prompt_text: String,

    /// Speaker archive loaded at startup and rewritten after every change
    #[arg(long)]
    speaker_cache: Option<PathBuf>,

    /// Where uploads are staged while a speaker is added
    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    // The blocking HTTP client cannot be created on a runtime thread, so the
    // backend is loaded before the runtime starts.
    let load_start = Instant::now();
    let backend = load_backend(&args.model_dir)?;
    let frontend = backend.frontend();
    let store = Arc::new(SpeakerStore::new(frontend.clone(), backend.transcriber.clone()));

    if let Some(cache) = &args.speaker_cache {
        if cache.exists() {
            store.load(cache)?;
        } else {
            log::info!("Speaker cache {} does not exist yet", cache.display());
        }
    }

    let reference = ReferenceAudio::load(&args.prompt_audio)?;
    let default_voice = store.prepare("default", reference, Some(args.prompt_text.as_str()))?;
    log::info!(
        "Default voice loaded from {} ({:.2}s)",
        args.prompt_audio.display(),
        default_voice.reference.duration_secs()
    );

    let synthesizer = Synthesizer::new(backend.model.clone(), frontend, store);
    let mut ctx = AppContext::new(synthesizer)
        .with_default_voice(Arc::new(default_voice))
        .with_api_key(Some(args.api_key));
    if let Some(dir) = args.staging_dir {
        std::fs::create_dir_all(&dir)?;
        ctx = ctx.with_staging_dir(dir);
    }
    if let Some(cache) = args.speaker_cache {
        ctx = ctx.with_speaker_cache(cache);
    }
    log::info!("Startup took {:.2?}", load_start.elapsed());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let ctx = Arc::new(ctx);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server::serve(ctx.clone(), addr))?;

    // Shut the runtime down before the last handle to the blocking client goes away.
    drop(runtime);
    drop(ctx);
    Ok(())
}
