mod db;
mod error;
mod models;
mod scheduler;

use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use db::Database;
use error::Result;
use models::{parse_verse_ref, JsonOutput, Learner};

const DEFAULT_DB_NAME: &str = "hifz.db";
const DEFAULT_DAILY_GOAL: u32 = 5;

#[derive(Parser)]
#[command(name = "hifz")]
#[command(about = "A spaced-repetition CLI for verse memorization using the SM-2 algorithm")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Learner profile to operate on
    #[arg(long, global = true, default_value = "default")]
    learner: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage learner profiles
    #[command(subcommand)]
    Learner(LearnerCommands),

    /// Manage the surah/verse catalog
    #[command(subcommand)]
    Surah(SurahCommands),

    /// Begin studying a verse, e.g. `hifz start 2:255`
    Start {
        /// Verse reference as surah:verse
        reference: String,
    },

    /// Record a review for a verse
    Review {
        /// Verse reference as surah:verse
        reference: String,

        /// Recall quality: 0 (forgotten) to 5 (perfect)
        #[arg(long, short)]
        quality: i32,
    },

    /// Show today's study plan (due verses plus new intake)
    Plan {
        /// Override the learner's daily goal
        #[arg(long, short)]
        goal: Option<u32>,
    },

    /// List verses due for review
    Due,

    /// Show study statistics
    Stats,

    /// Manage study sessions
    #[command(subcommand)]
    Session(SessionCommands),
}

#[derive(Subcommand)]
enum LearnerCommands {
    /// Add a learner profile
    Add {
        /// Learner name
        name: String,

        /// Daily verse goal
        #[arg(long, short, default_value_t = DEFAULT_DAILY_GOAL)]
        goal: u32,
    },

    /// List learner profiles
    List,

    /// Change a learner's daily goal
    Goal {
        /// Learner name
        name: String,

        /// New daily verse goal
        goal: u32,
    },
}

#[derive(Subcommand)]
enum SurahCommands {
    /// Add a surah and its verse skeleton to the catalog
    Add {
        /// Surah number
        number: u32,

        /// Surah name
        name: String,

        /// Number of verses
        #[arg(long, short)]
        verses: u32,
    },

    /// List catalogued surahs
    List,

    /// Add every verse of a surah to the study list
    Study {
        /// Surah number
        number: u32,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Open a study session
    Start,

    /// Close the open study session
    End,

    /// List past study sessions
    List,
}

fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("HIFZ_DB") {
        return PathBuf::from(path);
    }

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hifz");

    std::fs::create_dir_all(&config_dir).ok();
    config_dir.join(DEFAULT_DB_NAME)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn resolve_learner(db: &Database, name: &str) -> Result<Learner> {
    if let Some(learner) = db.get_learner(name)? {
        return Ok(learner);
    }
    db.add_learner(name, DEFAULT_DAILY_GOAL)
}

fn resolve_verse(db: &Database, reference: &str) -> std::result::Result<models::Verse, String> {
    let (surah, verse) = parse_verse_ref(reference)
        .ok_or_else(|| format!("Invalid verse reference '{}'. Use surah:verse, e.g. 2:255", reference))?;
    db.find_verse(surah, verse)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Verse {} is not in the catalog", reference))
}

fn run(cli: Cli) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let db_path = get_db_path();
    let mut db = Database::open(&db_path)?;
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Init => {
            db.init()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Learner(learner_cmd) => match learner_cmd {
            LearnerCommands::Add { name, goal } => {
                let learner = db.add_learner(&name, goal)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&learner))?);
                } else {
                    println!(
                        "Added learner '{}' with a daily goal of {} verses.",
                        learner.name, learner.daily_goal
                    );
                }
            }

            LearnerCommands::List => {
                let learners = db.list_learners()?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&learners))?);
                } else if learners.is_empty() {
                    println!("No learners found.");
                } else {
                    println!("{:<5} {:<30} GOAL", "ID", "NAME");
                    println!("{}", "-".repeat(45));
                    for learner in learners {
                        println!("{:<5} {:<30} {}", learner.id, learner.name, learner.daily_goal);
                    }
                }
            }

            LearnerCommands::Goal { name, goal } => {
                db.set_daily_goal(&name, goal)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                } else {
                    println!("Daily goal for '{}' set to {}.", name, goal);
                }
            }
        },

        Commands::Surah(surah_cmd) => match surah_cmd {
            SurahCommands::Add {
                number,
                name,
                verses,
            } => {
                let surah = db.add_surah(number, &name, verses)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&surah))?);
                } else {
                    println!(
                        "Added surah {} ({}) with {} verses.",
                        surah.number, surah.name, surah.verse_count
                    );
                }
            }

            SurahCommands::List => {
                let surahs = db.list_surahs()?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&surahs))?);
                } else if surahs.is_empty() {
                    println!("No surahs in the catalog.");
                } else {
                    println!("{:<8} {:<30} VERSES", "NUMBER", "NAME");
                    println!("{}", "-".repeat(50));
                    for surah in surahs {
                        println!("{:<8} {:<30} {}", surah.number, surah.name, surah.verse_count);
                    }
                }
            }

            SurahCommands::Study { number } => {
                let learner = resolve_learner(&db, &cli.learner)?;
                let session_id = db.open_session(learner.id)?.map(|s| s.id);
                let result = db.add_surah_to_study(learner.id, number, session_id, today)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&result))?);
                } else {
                    println!(
                        "Surah {}: {} added, {} already studied, {} total.",
                        number, result.added, result.already_present, result.total
                    );
                }
            }
        },

        Commands::Start { reference } => {
            let verse = resolve_verse(&db, &reference)?;
            let learner = resolve_learner(&db, &cli.learner)?;
            let session_id = db.open_session(learner.id)?.map(|s| s.id);
            let study = db.start_study(learner.id, verse.id, session_id, today)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&study))?);
            } else {
                println!("Started studying {}.", verse.reference());
                println!("First review is due today. After reviewing, record it with:");
                println!("  hifz review {} --quality <0-5>", verse.reference());
            }
        }

        Commands::Review { reference, quality } => {
            let verse = resolve_verse(&db, &reference)?;
            let learner = resolve_learner(&db, &cli.learner)?;
            let study = db.record_review(learner.id, verse.id, quality, today)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&study))?);
            } else {
                println!("Review recorded for {}.", verse.reference());
                println!(
                    "Next review: {} (in {} day{})",
                    study.next_review_date,
                    study.interval,
                    if study.interval == 1 { "" } else { "s" }
                );
                println!("Difficulty: {}", study.difficulty_label());
                if study.is_memorized {
                    println!("This verse is memorized. Keep reviewing to retain it.");
                }
            }
        }

        Commands::Plan { goal } => {
            let learner = resolve_learner(&db, &cli.learner)?;
            let goal = goal.unwrap_or(learner.daily_goal);
            let plan = db.daily_plan(learner.id, goal, today)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&plan))?);
            } else {
                println!("=== Daily Plan ({} verses) ===", plan.total);
                if plan.due.is_empty() {
                    println!("No verses due for review.");
                } else {
                    println!();
                    println!("Due for review:");
                    for item in &plan.due {
                        println!(
                            "  {:<8} due {} ({})",
                            item.verse.reference(),
                            item.study.next_review_date,
                            item.study.difficulty_label()
                        );
                    }
                }
                if !plan.new_verses.is_empty() {
                    println!();
                    println!("New verses to start:");
                    for verse in &plan.new_verses {
                        println!("  {}", verse.reference());
                    }
                }
            }
        }

        Commands::Due => {
            let learner = resolve_learner(&db, &cli.learner)?;
            let due = db.due_studies(learner.id, today)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&due))?);
            } else if due.is_empty() {
                println!("Nothing due. Well done.");
            } else {
                println!("{:<8} {:<12} {:<10} REPS", "VERSE", "DUE", "DIFFICULTY");
                println!("{}", "-".repeat(45));
                for item in due {
                    println!(
                        "{:<8} {:<12} {:<10} {}",
                        item.verse.reference(),
                        item.study.next_review_date.to_string(),
                        item.study.difficulty_label(),
                        item.study.repetitions
                    );
                }
            }
        }

        Commands::Stats => {
            let learner = resolve_learner(&db, &cli.learner)?;
            let stats = db.statistics(learner.id, today)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("=== Study Statistics ===");
                println!("Verses studied: {}", stats.progress.total_verses_studied);
                println!("Verses memorized: {}", stats.progress.total_verses_memorized);
                println!("Surahs studied: {}", stats.studied_surah_count);
                println!("Study time: {} minutes", stats.progress.total_study_minutes);
                println!(
                    "Streak: {} day(s) (longest {})",
                    stats.progress.current_streak, stats.progress.longest_streak
                );
                println!();
                println!("Due today: {}", stats.due_today);
                println!("Due tomorrow: {}", stats.due_tomorrow);
                println!("Due within a week: {}", stats.due_next_week);
                println!();
                let h = &stats.difficulty_distribution;
                println!("Difficulty: very easy {}, easy {}, medium {}, hard {}, very hard {}",
                    h.very_easy, h.easy, h.medium, h.hard, h.very_hard
                );
            }
        }

        Commands::Session(session_cmd) => match session_cmd {
            SessionCommands::Start => {
                let learner = resolve_learner(&db, &cli.learner)?;
                let session = db.start_session(learner.id)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&session))?);
                } else {
                    println!("Study session opened at {}.", session.start_time);
                }
            }

            SessionCommands::End => {
                let learner = resolve_learner(&db, &cli.learner)?;
                let session = db.end_session(learner.id, today)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&session))?);
                } else {
                    println!(
                        "Session closed: {} review{} over {} minute(s).",
                        session.verses_studied,
                        if session.verses_studied == 1 { "" } else { "s" },
                        session.duration_minutes().unwrap_or(0)
                    );
                }
            }

            SessionCommands::List => {
                let learner = resolve_learner(&db, &cli.learner)?;
                let sessions = db.list_sessions(learner.id)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&sessions))?);
                } else if sessions.is_empty() {
                    println!("No study sessions yet.");
                } else {
                    println!("{:<5} {:<26} {:<10} REVIEWS", "ID", "STARTED", "MINUTES");
                    println!("{}", "-".repeat(55));
                    for session in sessions {
                        let minutes = match session.duration_minutes() {
                            Some(m) => m.to_string(),
                            None => "open".to_string(),
                        };
                        println!(
                            "{:<5} {:<26} {:<10} {}",
                            session.id, session.start_time, minutes, session.verses_studied
                        );
                    }
                }
            }
        },
    }

    Ok(())
}
