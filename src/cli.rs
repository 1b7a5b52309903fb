use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "skillcoach")]
#[command(about = "Question bank ingestion, practice assembly and mastery tracking")]
#[command(version, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./skillcoach.toml when present)
    #[arg(long, global = true, env = "SKILLCOACH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import questions from a pdf, docx, markdown or text file
    Ingest(IngestArgs),

    /// List registered tags
    Tags,

    /// Query stored questions by tag and difficulty
    Questions(QuestionsArgs),

    /// Assemble a practice set for a student
    Practice(PracticeArgs),

    /// Grade practice answers and update mastery
    SubmitPractice(SubmitPracticeArgs),

    /// Start an exam for a student
    ExamStart(ExamStartArgs),

    /// Submit exam answers
    ExamSubmit(ExamSubmitArgs),

    /// Show per-tag mastery for a student
    Profile(ProfileArgs),

    /// Ask the provider to explain a question
    Explain(ExplainArgs),

    /// Send a message to the tutor
    Chat(ChatArgs),

    /// Show or clear a student's tutor conversation
    ChatHistory(ChatHistoryArgs),
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    pub file: PathBuf,

    /// Topic type code stored on the document and its questions
    #[arg(long)]
    pub topic_type: Option<i64>,
}

#[derive(Args, Debug)]
pub struct QuestionsArgs {
    #[arg(long)]
    pub tag: Option<String>,

    /// Comma separated list, e.g. "easy,hard"
    #[arg(long)]
    pub difficulties: Option<String>,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct PracticeArgs {
    pub student: String,
    pub tag: String,

    #[arg(long)]
    pub count: Option<usize>,

    #[arg(long, env = "SKILLCOACH_AUTH_TOKEN")]
    pub auth_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct SubmitPracticeArgs {
    pub student: String,
    pub tag: String,

    /// JSON array of {"questionId", "studentAnswer"}, inline or @file
    #[arg(long)]
    pub answers: String,
}

#[derive(Args, Debug)]
pub struct ExamStartArgs {
    pub student: String,
}

#[derive(Args, Debug)]
pub struct ExamSubmitArgs {
    pub exam_id: String,
    pub student: String,

    /// JSON array of {"questionId", "studentAnswer"}, inline or @file
    #[arg(long)]
    pub answers: String,
}

#[derive(Args, Debug)]
pub struct ProfileArgs {
    pub student: String,
}

#[derive(Args, Debug)]
pub struct ExplainArgs {
    pub student: String,

    #[arg(long)]
    pub question: String,

    #[arg(long)]
    pub user_answer: String,

    #[arg(long)]
    pub correct_answer: String,

    #[arg(long, env = "SKILLCOACH_AUTH_TOKEN")]
    pub auth_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    pub student: String,
    pub message: String,

    #[arg(long, env = "SKILLCOACH_AUTH_TOKEN")]
    pub auth_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct ChatHistoryArgs {
    pub student: String,

    /// Delete the conversation instead of printing it
    #[arg(long)]
    pub clear: bool,
}

/// 读取作答 JSON，`@path` 表示从文件读取
pub fn read_answers(raw: &str) -> crate::Result<Vec<crate::models::SubmittedAnswer>> {
    let content = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)?,
        None => raw.to_string(),
    };
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from([
            "skillcoach",
            "--config",
            "custom.toml",
            "practice",
            "s1",
            "math",
            "--count",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Commands::Practice(args) => {
                assert_eq!(args.student, "s1");
                assert_eq!(args.count, Some(3));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_commands() {
        let cli = Cli::try_parse_from(["skillcoach", "chat", "s1", "what is a prime?"]).unwrap();
        match cli.command {
            Commands::Chat(args) => assert_eq!(args.message, "what is a prime?"),
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["skillcoach", "chat-history", "s1", "--clear"]).unwrap();
        match cli.command {
            Commands::ChatHistory(args) => {
                assert_eq!(args.student, "s1");
                assert!(args.clear);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_read_answers_inline_and_file() {
        let inline = read_answers(r#"[{"questionId":"q1","studentAnswer":"4"}]"#).unwrap();
        assert_eq!(inline[0].question_id, "q1");

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("answers.json");
        fs::write(&path, r#"[{"questionId":"q2","studentAnswer":"x"}]"#).unwrap();
        let from_file = read_answers(&format!("@{}", path.display())).unwrap();
        assert_eq!(from_file[0].student_answer, "x");

        assert!(read_answers("not json").is_err());
    }
}
