// Some helpers here are exercised through JSON output and tests rather than
// every CLI path
#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A content unit: a chapter of verses, identified by its canonical number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Surah {
    pub id: i64,
    pub number: u32,
    pub name: String,
    pub verse_count: u32,
}

/// A memorization item. The engine never stores or inspects verse text;
/// a verse is identity, parent surah, and position only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verse {
    pub id: i64,
    pub surah_id: i64,
    pub surah_number: u32,
    pub verse_number: u32,
}

impl Verse {
    /// Canonical display reference, e.g. "2:255".
    pub fn reference(&self) -> String {
        format!("{}:{}", self.surah_number, self.verse_number)
    }
}

/// Parses a "surah:verse" reference like "2:255".
pub fn parse_verse_ref(s: &str) -> Option<(u32, u32)> {
    let (surah, verse) = s.split_once(':')?;
    let surah: u32 = surah.trim().parse().ok()?;
    let verse: u32 = verse.trim().parse().ok()?;
    if surah == 0 || verse == 0 {
        return None;
    }
    Some((surah, verse))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learner {
    pub id: i64,
    pub name: String,
    /// Target number of verses per day; caps new-verse intake, never
    /// the due queue.
    pub daily_goal: u32,
    pub created_at: String,
}

/// Per-(learner, verse) scheduling state. One row per pair, mutated only
/// by recording a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerseStudy {
    pub id: i64,
    pub learner_id: i64,
    pub verse_id: i64,
    /// Session during which study began, informational only.
    pub session_id: Option<i64>,
    pub easiness_factor: f64,
    pub interval: u32,
    pub repetitions: u32,
    pub next_review_date: NaiveDate,
    pub difficulty: u8,
    pub is_memorized: bool,
    pub first_studied_at: String,
    pub last_studied_at: String,
}

impl VerseStudy {
    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        self.next_review_date <= as_of
    }

    pub fn difficulty_label(&self) -> &'static str {
        match self.difficulty {
            1 => "Very Easy",
            2 => "Easy",
            3 => "Medium",
            4 => "Hard",
            5 => "Very Hard",
            _ => "Unknown",
        }
    }
}

/// A verse joined with its study state, as returned by queue queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudiedVerse {
    pub verse: Verse,
    pub study: VerseStudy,
}

/// One study interval for a learner. At most one row per learner may have
/// a null end_time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySession {
    pub id: i64,
    pub learner_id: i64,
    pub start_time: String,
    pub end_time: Option<String>,
    /// Snapshot at close: reviews attributed to this session.
    pub verses_studied: u32,
}

impl StudySession {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Whole minutes between start and end; None while the session is open
    /// or if either timestamp fails to parse.
    pub fn duration_minutes(&self) -> Option<i64> {
        let end = self.end_time.as_deref()?;
        let start = DateTime::parse_from_rfc3339(&self.start_time).ok()?;
        let end = DateTime::parse_from_rfc3339(end).ok()?;
        let minutes = end
            .with_timezone(&Utc)
            .signed_duration_since(start.with_timezone(&Utc))
            .num_minutes();
        Some(minutes.max(0))
    }
}

/// Derived per-learner aggregate. Never a source of truth: every field is
/// reproducible by rescanning verse studies and closed sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyProgress {
    pub learner_id: i64,
    pub total_verses_studied: u32,
    pub total_verses_memorized: u32,
    pub total_study_minutes: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_study_date: Option<NaiveDate>,
}

impl StudyProgress {
    pub fn empty(learner_id: i64) -> Self {
        Self {
            learner_id,
            total_verses_studied: 0,
            total_verses_memorized: 0,
            total_study_minutes: 0,
            current_streak: 0,
            longest_streak: 0,
            last_study_date: None,
        }
    }
}

/// Today's workload: every due verse plus enough new verses to reach the
/// daily goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyPlan {
    pub due: Vec<StudiedVerse>,
    pub new_verses: Vec<Verse>,
    pub total: usize,
}

/// Outcome of bulk-adding a surah to a learner's study list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSurahResult {
    pub added: u32,
    pub already_present: u32,
    pub total: u32,
}

/// Counts per difficulty level 1-5.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DifficultyHistogram {
    pub very_easy: u32,
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
    pub very_hard: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub progress: StudyProgress,
    pub due_today: u32,
    pub due_tomorrow: u32,
    pub due_next_week: u32,
    pub difficulty_distribution: DifficultyHistogram,
    pub studied_surah_count: u32,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
