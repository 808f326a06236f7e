use std::path::PathBuf;

use common::{secret_from_env, Config};
use newscast::speech::EspeakTts;

/// Report which collaborators the configuration will wire, without running anything.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let override_path = std::env::args().nth(1).map(PathBuf::from).or_else(|| {
        let p = PathBuf::from("config.toml");
        p.exists().then_some(p)
    });
    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(
        default_path.exists().then_some(default_path.as_path()),
        override_path.as_deref(),
    )
    .await?;

    println!("\n{}", "=".repeat(60));
    println!("Newscast preflight");
    println!("{}", "=".repeat(60));

    let mut ready = true;
    match config.validate() {
        Ok(()) => println!("✓ configuration valid"),
        Err(e) => {
            println!("✗ configuration invalid: {}", e);
            ready = false;
        }
    }

    let sources = config.enabled_sources();
    println!("  sources: {} enabled of {}", sources.len(), config.sources.len());
    for source in &sources {
        println!("    - {} ({})", source.name, source.url);
    }

    let llm_key = config
        .llm
        .as_ref()
        .and_then(|llm| secret_from_env(llm.api_key_env.as_deref()));
    report("LLM API key", llm_key.is_some(), "summaries use the extractive fallback");

    let tts = &config.tts;
    if tts.enabled() {
        let tts_key = secret_from_env(tts.api_key_env.as_deref());
        report("cloud TTS key", tts_key.is_some(), "podcasts use espeak");

        let espeak = EspeakTts::new(
            tts.espeak_binary.clone().unwrap_or_else(|| "espeak".to_string()),
            tts.espeak_voice.clone().unwrap_or_else(|| "en+f3".to_string()),
            tts.words_per_minute(),
        );
        let espeak_ok = espeak.is_installed().await;
        report("espeak", espeak_ok, "no local speech fallback");
        if tts_key.is_none() && !espeak_ok {
            println!("  ! no speech engine available; delivery will send text only");
        }
    } else {
        println!("- speech synthesis disabled");
    }

    let telegram = config.delivery.as_ref().map(|d| {
        (
            secret_from_env(d.bot_token_env.as_deref()).is_some(),
            secret_from_env(d.chat_id_env.as_deref()).is_some(),
        )
    });
    report(
        "Telegram credentials",
        telegram == Some((true, true)),
        "results are not delivered",
    );

    match &config.storage.archive_dir {
        Some(dir) => println!(
            "✓ archive: {} (retention {} days)",
            dir,
            config.storage.retention_days()
        ),
        None => println!("- archive disabled"),
    }
    match &config.database {
        Some(db) => println!("✓ run history: {}", db.path),
        None => println!("- run history disabled"),
    }

    println!("{}", "=".repeat(60));
    if !ready {
        std::process::exit(1);
    }
    Ok(())
}

fn report(what: &str, ok: bool, otherwise: &str) {
    if ok {
        println!("✓ {}", what);
    } else {
        println!("✗ {} missing: {}", what, otherwise);
    }
}
