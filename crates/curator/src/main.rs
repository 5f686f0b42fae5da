mod artwork;
mod config;
mod external;
mod root_art;
mod run;
mod summary;

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use common::AudioExtensions;
use library::{check_root, LoftyProbe, NoLookup, ReleaseLookup, SyncOptions};
use tracing::{error, info};

use artwork::CoverSource;
use config::{load_or_create_config, resolve_path, Roots, CONFIG_ENV};
use external::{MusicBrainzLookup, WebLookup, WebSource};
use run::{Curator, Mode};
use summary::{exit_status, log_report, write_summary, RunSummary};

#[derive(Parser, Debug)]
#[command(name = "curator", version, about = "Keeps a music library tidy")]
struct Args {
    /// What to run.
    #[arg(long, value_enum, default_value_t = Mode::Normal)]
    mode: Mode,

    /// Report every decision without touching the filesystem.
    #[arg(long)]
    dry: bool,

    /// Config file; defaults to config.yaml next to the executable.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(config::config_path_from_env);
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}; set library_root and run again", config_path);
        return Ok(ExitCode::SUCCESS);
    }
    info!("Loaded config from {:?}", config_path);
    config.validate()?;

    let roots = Roots::resolve(&config_path, &config);
    roots.validate()?;
    if let Err(err) = check_root(&roots.library) {
        error!("Library unavailable: {}", err);
        return Err(err.into());
    }

    let options = SyncOptions {
        extensions: AudioExtensions::new(&config.audio_extensions),
        junk_filenames: config.junk_filenames.clone(),
        dry_run: args.dry,
    };
    let source = WebSource {
        user_agent: config.musicbrainz_user_agent.clone(),
        timeout: Duration::from_secs(config.web_lookup_timeout_secs),
        retries: config.web_lookup_retries,
    };

    // one client for both passes, so MusicBrainz sees a single throttled caller
    let web = if config.release_lookup_enabled || config.web_art_lookup_enabled {
        Some(Rc::new(WebLookup::new(source)?))
    } else {
        None
    };
    let lookup: Box<dyn ReleaseLookup> = match &web {
        Some(web) if config.release_lookup_enabled => Box::new(MusicBrainzLookup::new(Rc::clone(web))),
        _ => Box::new(NoLookup),
    };
    let covers: Option<&WebLookup> = web.as_deref().filter(|_| config.web_art_lookup_enabled);

    let curator = Curator {
        roots: &roots,
        options: &options,
        mirror_exclude_dirs: &config.mirror_exclude_dirs,
        clean_empty_download_dirs: config.clean_empty_download_dirs,
        probe: &LoftyProbe,
        lookup: lookup.as_ref(),
        covers: covers.map(|web| web as &dyn CoverSource),
    };
    let report = curator.run(args.mode);
    log_report(&report);

    if let Some(path) = config.summary_path.as_deref().filter(|p| !p.trim().is_empty()) {
        let path = resolve_path(&config_path, path.trim());
        write_summary(&path, &RunSummary::new(args.mode, args.dry, &report))?;
        info!("Wrote summary to {:?}", path);
    }
    Ok(ExitCode::from(exit_status(&report.summary())))
}
