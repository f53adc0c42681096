use std::collections::BTreeSet;
use std::fmt;

use quiz_core::model::{AttemptId, QuestionDraft, QuestionType, QuizId, UserId, Visibility};
use services::{
    AttemptLoopService, AuthSession, AuthoringService, Clock, QuizDetails, QuizService,
    RecordsService, ReviewService,
};
use storage::repository::Storage;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidUser { raw: String },
    InvalidQuizId { raw: String },
    InvalidAttemptId { raw: String },
    MissingQuizId { command: &'static str },
    MissingAttemptId,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw:?}"),
            ArgsError::InvalidQuizId { raw } => write!(f, "invalid --quiz value: {raw}"),
            ArgsError::InvalidAttemptId { raw } => {
                write!(f, "invalid --attempt value (expected UUID): {raw}")
            }
            ArgsError::MissingQuizId { command } => write!(f, "{command} requires --quiz"),
            ArgsError::MissingAttemptId => write!(f, "review requires --attempt"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Seed,
    Demo,
    Records,
    Review,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "seed" => Some(Self::Seed),
            "demo" => Some(Self::Demo),
            "records" => Some(Self::Records),
            "review" => Some(Self::Review),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Demo => "demo",
            Self::Records => "records",
            Self::Review => "review",
        }
    }
}

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    user: UserId,
    quiz_id: Option<QuizId>,
    attempt_id: Option<AttemptId>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("QUIZ_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://quiz.sqlite3".into(), normalize_sqlite_url);
        let mut user = std::env::var("QUIZ_USER_ID")
            .ok()
            .and_then(|value| value.parse::<UserId>().ok())
            .unwrap_or_else(|| UserId::new("demo-user"));
        let mut quiz_id = None;
        let mut attempt_id = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    user = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?;
                }
                "--quiz" => {
                    let value = require_value(args, "--quiz")?;
                    let parsed = value
                        .parse::<QuizId>()
                        .map_err(|_| ArgsError::InvalidQuizId { raw: value.clone() })?;
                    quiz_id = Some(parsed);
                }
                "--attempt" => {
                    let value = require_value(args, "--attempt")?;
                    let parsed = value
                        .parse::<AttemptId>()
                        .map_err(|_| ArgsError::InvalidAttemptId { raw: value.clone() })?;
                    attempt_id = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            user,
            quiz_id,
            attempt_id,
        })
    }

    fn require_quiz(&self, command: Command) -> Result<QuizId, ArgsError> {
        self.quiz_id.ok_or(ArgsError::MissingQuizId {
            command: command.name(),
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- seed    [--db <sqlite_url>] [--user <id>]");
    eprintln!("  cargo run -p app -- demo    --quiz <id> [--db <sqlite_url>] [--user <id>]");
    eprintln!("  cargo run -p app -- records [--quiz <id>] [--db <sqlite_url>] [--user <id>]");
    eprintln!("  cargo run -p app -- review  --quiz <id> --attempt <uuid> [--db <sqlite_url>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://quiz.sqlite3");
    eprintln!("  --user demo-user");
    eprintln!();
    eprintln!("Environment (also read from .env):");
    eprintln!("  QUIZ_DB_URL, QUIZ_USER_ID, RUST_LOG");
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim();
    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = std::path::Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }
    Ok(())
}

/// Creates a small public quiz owned by the current user.
async fn seed(storage: &Storage, auth: &AuthSession) -> Result<(), Box<dyn std::error::Error>> {
    let quizzes = QuizService::new(
        Clock::default(),
        storage.quizzes.clone(),
        storage.questions.clone(),
    );
    let authoring = AuthoringService::new(storage.questions.clone());

    let quiz_id = quizzes
        .create_quiz(
            auth,
            QuizDetails {
                title: "Rust ownership".to_owned(),
                description: "Moves, borrows and lifetimes".to_owned(),
                total_marks: 10,
                visibility: Visibility::Public,
            },
        )
        .await?;

    let drafts = [
        QuestionDraft::single_choice(
            "What happens to a String after it is moved?",
            ["It is copied", "The old binding is unusable", "It is dropped"],
            1,
            3,
        ),
        QuestionDraft::multiple_choice(
            "Which types implement Copy?",
            ["i32", "Vec<u8>", "bool", "String"],
            [0, 2],
            4,
        ),
        QuestionDraft::open_answer("Describe when a borrow ends.", 3),
    ];
    for draft in drafts {
        authoring.add_question(auth, quiz_id, draft).await?;
    }

    let allocation = authoring.allocation(quiz_id).await?;
    println!(
        "Seeded quiz {quiz_id} ({}/{} marks allocated)",
        allocation.allocated, allocation.total_marks
    );
    Ok(())
}

/// Takes an attempt, picking the first option of every choice question.
async fn demo(
    storage: &Storage,
    auth: &AuthSession,
    quiz_id: QuizId,
) -> Result<(), Box<dyn std::error::Error>> {
    let attempts = AttemptLoopService::new(
        Clock::default(),
        storage.questions.clone(),
        storage.attempts.clone(),
    );
    let mut session = attempts.start_attempt(auth, quiz_id).await?;

    while let Some(question) = session.current_question() {
        let question_id = question.id();
        let (selected, text) = match question.kind() {
            QuestionType::OpenAnswer => (BTreeSet::new(), Some("Once it is last used.".to_owned())),
            QuestionType::SingleChoice | QuestionType::MultipleChoice => {
                (std::iter::once(0).collect(), None)
            }
        };
        let outcome = attempts
            .submit_answer(&mut session, question_id, selected, text)
            .await?;
        println!(
            "question {question_id}: earned {} (score {})",
            outcome.record.earned_marks, outcome.score
        );
    }

    println!("Completed attempt {}", session.id());
    Ok(())
}

async fn records(
    storage: &Storage,
    user: &UserId,
    quiz_id: Option<QuizId>,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = RecordsService::new(storage.quizzes.clone(), storage.attempts.clone());

    if let Some(quiz_id) = quiz_id {
        for record in records.attempts_for_user(quiz_id, user).await? {
            let status = record
                .completed_at
                .map_or_else(|| "in progress".to_owned(), |at| at.to_rfc3339());
            println!(
                "{}  {}/{}  started {}  {status}",
                record.attempt_id,
                record.score,
                record.total_marks,
                record.started_at.to_rfc3339()
            );
        }
    }

    let stats = records.profile_stats(user).await?;
    println!(
        "{user}: {} quizzes created, {} attempts, {}/{} marks ({:.1}%)",
        stats.quizzes_created,
        stats.attempts_made,
        stats.total_achieved,
        stats.total_possible,
        stats.average_percent
    );
    Ok(())
}

async fn review(
    storage: &Storage,
    user: &UserId,
    quiz_id: QuizId,
    attempt_id: AttemptId,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = ReviewService::new(storage.questions.clone(), storage.attempts.clone())
        .review_attempt(user, quiz_id, attempt_id)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(first) if first == "--help" || first == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;
    let auth = AuthSession::signed_in(args.user.clone());
    tracing::debug!(command = cmd.name(), db = %args.db_url, user = %args.user, "running");

    match cmd {
        Command::Seed => seed(&storage, &auth).await,
        Command::Demo => demo(&storage, &auth, args.require_quiz(cmd)?).await,
        Command::Records => records(&storage, &args.user, args.quiz_id).await,
        Command::Review => {
            let quiz_id = args.require_quiz(cmd)?;
            let attempt_id = args.attempt_id.ok_or(ArgsError::MissingAttemptId)?;
            review(&storage, &args.user, quiz_id, attempt_id).await
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
