use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use skillcoach::cli::{read_answers, Cli, Commands};
use skillcoach::commands;
use skillcoach::services::ExplanationRequest;
use skillcoach::{AppConfig, AppState};

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    skillcoach::utils::init_logger(&config.log_level, config.log_file.as_deref())?;

    let default_topic_type = config.exam.topic_type;
    let state = AppState::from_config(config).context("failed to initialize storage")?;

    match cli.command {
        Commands::Ingest(args) => {
            let topic_type = args.topic_type.or(Some(default_topic_type));
            let report = commands::ingest_document(&state, &args.file, topic_type)
                .with_context(|| format!("failed to ingest {}", args.file.display()))?;
            print_json(&report)
        }
        Commands::Tags => print_json(&commands::list_tags(&state)?),
        Commands::Questions(args) => print_json(&commands::find_questions(
            &state,
            args.tag.as_deref(),
            args.difficulties.as_deref(),
            args.limit,
        )?),
        Commands::Practice(args) => {
            let set = commands::practice(
                &state,
                &args.student,
                &args.tag,
                args.count,
                args.auth_token.as_deref(),
            )
            .await?;
            print_json(&set)
        }
        Commands::SubmitPractice(args) => {
            let answers = read_answers(&args.answers).context("invalid answers")?;
            print_json(&commands::submit_practice(
                &state,
                &args.student,
                &args.tag,
                &answers,
            )?)
        }
        Commands::ExamStart(args) => print_json(&commands::start_exam(&state, &args.student)?),
        Commands::ExamSubmit(args) => {
            let answers = read_answers(&args.answers).context("invalid answers")?;
            print_json(&commands::submit_exam(
                &state,
                &args.exam_id,
                &args.student,
                &answers,
            )?)
        }
        Commands::Profile(args) => print_json(&commands::profile(&state, &args.student)?),
        Commands::Explain(args) => {
            let request = ExplanationRequest {
                user_id: args.student,
                question: args.question,
                user_answer: args.user_answer,
                correct_answer: args.correct_answer,
                auth_token: args.auth_token,
            };
            print_json(&state.provider.explain(&request).await)
        }
        Commands::Chat(args) => {
            let reply = commands::chat(
                &state,
                &args.student,
                &args.message,
                args.auth_token.as_deref(),
            )
            .await?;
            print_json(&reply)
        }
        Commands::ChatHistory(args) if args.clear => {
            let removed = commands::clear_chat_history(&state, &args.student)?;
            print_json(&serde_json::json!({ "cleared": removed }))
        }
        Commands::ChatHistory(args) => {
            print_json(&commands::chat_history(&state, &args.student)?)
        }
    }
}
