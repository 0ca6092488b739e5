use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tutorlens::TutorError;
use tutorlens::classify::HttpClassifier;
use tutorlens::cli::{Cli, Command, FinalizeArgs, ProgressArgs};
use tutorlens::config::load_config;
use tutorlens::db::{open_db, open_db_readonly};
use tutorlens::finalize::{FinalizeRequest, finalize_session};
use tutorlens::model::validate_id;
use tutorlens::progress::learner_progress;
use tutorlens::{import, serve, status, vocabulary};

fn default_db_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".tutorlens").join("tutorlens.db")
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<(), TutorError> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{out}");
    Ok(())
}

fn handle_progress(db_path: &Path, args: ProgressArgs) -> Result<(), TutorError> {
    let config = load_config()?;
    let tz = config.calendar.tz()?;
    validate_id("learnerId", &args.learner)?;
    let conn = open_db_readonly(db_path)?;
    let report = learner_progress(&conn, &args.learner, chrono::Utc::now(), tz)?;
    print_json(&report, args.pretty)
}

fn handle_finalize(db_path: &Path, args: FinalizeArgs) -> Result<(), TutorError> {
    let request = FinalizeRequest {
        learner_id: args.learner,
        exercise_id: args.exercise,
        interaction_id: args.interaction,
        solved_first_try: args.solved_first_try,
    };
    request.validate()?;

    let config = load_config()?;
    let vocab = vocabulary::init(config.classifier.vocabulary_path.as_deref())?;
    let conn = open_db(db_path)?;
    let classifier = (config.classifier.enabled && !args.no_classify)
        .then(|| HttpClassifier::new(&config.classifier));
    let response = finalize_session(&conn, &request, classifier.as_ref(), vocab, chrono::Utc::now())?;
    print_json(&response, false)
}

fn handle_vocab() -> Result<(), TutorError> {
    let config = load_config()?;
    let vocab = vocabulary::init(config.classifier.vocabulary_path.as_deref())?;
    for (id, name) in vocab.entries() {
        println!("{id}\t{name}");
    }
    Ok(())
}

fn run() -> Result<(), TutorError> {
    let cli = Cli::parse();
    let db_path = cli.db.unwrap_or_else(default_db_path);

    match cli.command {
        Command::Progress(args) => handle_progress(&db_path, args),
        Command::Finalize(args) => handle_finalize(&db_path, args),
        Command::Import => import::handle_import(&db_path),
        Command::Serve => serve::handle_serve(&db_path),
        Command::Status => status::handle_status(&db_path),
        Command::Vocab => handle_vocab(),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if e.is_client_error() {
                eprintln!("tutorlens: {e}");
                ExitCode::from(2)
            } else {
                log::error!("{e}");
                eprintln!("tutorlens: {e}");
                ExitCode::from(1)
            }
        }
    }
}
