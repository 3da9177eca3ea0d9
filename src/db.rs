use chrono::{Days, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{
    AddSurahResult, DailyPlan, DifficultyHistogram, Learner, Statistics, StudiedVerse,
    StudyProgress, StudySession, Surah, Verse, VerseStudy,
};
use crate::scheduler::Sm2State;

/// Rows per transaction when bulk-adding a surah. Bounds lock duration;
/// each batch commit is atomic on its own.
const BULK_BATCH_SIZE: usize = 20;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS surahs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                number INTEGER NOT NULL UNIQUE,
                name TEXT NOT NULL,
                verse_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS verses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                surah_id INTEGER NOT NULL,
                verse_number INTEGER NOT NULL,
                UNIQUE (surah_id, verse_number),
                FOREIGN KEY (surah_id) REFERENCES surahs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS learners (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                daily_goal INTEGER NOT NULL DEFAULT 5,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS study_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                learner_id INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                verses_studied INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE
            );

            -- One scheduling state per (learner, verse); the unique index is
            -- the final authority against duplicate starts.
            CREATE TABLE IF NOT EXISTS verse_studies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                learner_id INTEGER NOT NULL,
                verse_id INTEGER NOT NULL,
                session_id INTEGER,
                easiness_factor REAL NOT NULL DEFAULT 2.5,
                interval INTEGER NOT NULL DEFAULT 1,
                repetitions INTEGER NOT NULL DEFAULT 0,
                next_review_date TEXT NOT NULL,
                difficulty INTEGER NOT NULL DEFAULT 3,
                is_memorized INTEGER NOT NULL DEFAULT 0,
                first_studied_at TEXT NOT NULL,
                last_studied_at TEXT NOT NULL,
                UNIQUE (learner_id, verse_id),
                FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE,
                FOREIGN KEY (verse_id) REFERENCES verses(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES study_sessions(id) ON DELETE SET NULL
            );

            -- Append-only review audit; session_id tags reviews performed
            -- while a session was open.
            CREATE TABLE IF NOT EXISTS review_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                learner_id INTEGER NOT NULL,
                verse_id INTEGER NOT NULL,
                session_id INTEGER,
                quality INTEGER NOT NULL,
                reviewed_at TEXT NOT NULL,
                FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE,
                FOREIGN KEY (verse_id) REFERENCES verses(id) ON DELETE CASCADE,
                FOREIGN KEY (session_id) REFERENCES study_sessions(id) ON DELETE SET NULL
            );

            -- Derived cache; rebuildable from verse_studies + study_sessions.
            CREATE TABLE IF NOT EXISTS study_progress (
                learner_id INTEGER PRIMARY KEY,
                total_verses_studied INTEGER NOT NULL DEFAULT 0,
                total_verses_memorized INTEGER NOT NULL DEFAULT 0,
                total_study_minutes INTEGER NOT NULL DEFAULT 0,
                current_streak INTEGER NOT NULL DEFAULT 0,
                longest_streak INTEGER NOT NULL DEFAULT 0,
                last_study_date TEXT,
                FOREIGN KEY (learner_id) REFERENCES learners(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_verses_order ON verses(surah_id, verse_number);
            CREATE INDEX IF NOT EXISTS idx_studies_due ON verse_studies(learner_id, next_review_date);
            CREATE INDEX IF NOT EXISTS idx_studies_memorized ON verse_studies(learner_id, is_memorized);
            CREATE INDEX IF NOT EXISTS idx_sessions_learner ON study_sessions(learner_id);
            CREATE INDEX IF NOT EXISTS idx_review_log_session ON review_log(session_id);
            "#,
        )?;

        Ok(())
    }

    // Surah/verse catalog operations. The catalog gives verses stable
    // identity and canonical ordering; text lives elsewhere.

    pub fn add_surah(&mut self, number: u32, name: &str, verse_count: u32) -> Result<Surah> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM surahs WHERE number = ?1",
                params![number],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(Error::conflict(format!("surah {} already exists", number)));
        }

        tx.execute(
            "INSERT INTO surahs (number, name, verse_count) VALUES (?1, ?2, ?3)",
            params![number, name, verse_count],
        )?;
        let surah_id = tx.last_insert_rowid();

        {
            let mut stmt =
                tx.prepare("INSERT INTO verses (surah_id, verse_number) VALUES (?1, ?2)")?;
            for verse_number in 1..=verse_count {
                stmt.execute(params![surah_id, verse_number])?;
            }
        }

        tx.commit()?;

        Ok(Surah {
            id: surah_id,
            number,
            name: name.to_string(),
            verse_count,
        })
    }

    pub fn get_surah(&self, number: u32) -> Result<Option<Surah>> {
        let surah = self
            .conn
            .query_row(
                "SELECT id, number, name, verse_count FROM surahs WHERE number = ?1",
                params![number],
                Self::map_surah,
            )
            .optional()?;
        Ok(surah)
    }

    pub fn list_surahs(&self) -> Result<Vec<Surah>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, number, name, verse_count FROM surahs ORDER BY number")?;
        let rows = stmt.query_map([], Self::map_surah)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn find_verse(&self, surah_number: u32, verse_number: u32) -> Result<Option<Verse>> {
        let verse = self
            .conn
            .query_row(
                r#"
                SELECT v.id, v.surah_id, s.number, v.verse_number
                FROM verses v
                JOIN surahs s ON v.surah_id = s.id
                WHERE s.number = ?1 AND v.verse_number = ?2
                "#,
                params![surah_number, verse_number],
                Self::map_verse,
            )
            .optional()?;
        Ok(verse)
    }

    // Learner operations

    pub fn add_learner(&self, name: &str, daily_goal: u32) -> Result<Learner> {
        if self.get_learner(name)?.is_some() {
            return Err(Error::conflict(format!("learner '{}' already exists", name)));
        }
        self.conn.execute(
            "INSERT INTO learners (name, daily_goal, created_at) VALUES (?1, ?2, ?3)",
            params![name, daily_goal, Utc::now().to_rfc3339()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_learner(name)?
            .ok_or_else(|| Error::not_found(format!("learner {}", id)))
    }

    pub fn get_learner(&self, name: &str) -> Result<Option<Learner>> {
        let learner = self
            .conn
            .query_row(
                "SELECT id, name, daily_goal, created_at FROM learners WHERE name = ?1",
                params![name],
                Self::map_learner,
            )
            .optional()?;
        Ok(learner)
    }

    pub fn list_learners(&self) -> Result<Vec<Learner>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, daily_goal, created_at FROM learners ORDER BY name")?;
        let rows = stmt.query_map([], Self::map_learner)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_daily_goal(&self, name: &str, daily_goal: u32) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE learners SET daily_goal = ?1 WHERE name = ?2",
            params![daily_goal, name],
        )?;
        if changed == 0 {
            return Err(Error::not_found(format!("learner '{}'", name)));
        }
        Ok(())
    }

    // Study operations

    pub fn get_study(&self, learner_id: i64, verse_id: i64) -> Result<Option<VerseStudy>> {
        Self::query_study(&self.conn, learner_id, verse_id)
    }

    /// Begins tracking a verse for a learner. The verse is due immediately;
    /// the SM-2 update formula does not run on a start.
    pub fn start_study(
        &mut self,
        learner_id: i64,
        verse_id: i64,
        session_id: Option<i64>,
        today: NaiveDate,
    ) -> Result<VerseStudy> {
        let state = Sm2State::new();
        let now = Utc::now().to_rfc3339();

        {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;

            if Self::query_study(&tx, learner_id, verse_id)?.is_some() {
                return Err(Error::conflict(format!(
                    "verse {} is already being studied",
                    verse_id
                )));
            }

            // INSERT OR IGNORE: a racing start loses to the unique index and
            // is reported as a conflict, never as a constraint error.
            let inserted = tx.execute(
                r#"
                INSERT OR IGNORE INTO verse_studies
                    (learner_id, verse_id, session_id, easiness_factor, interval, repetitions,
                     next_review_date, difficulty, is_memorized, first_studied_at, last_studied_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                "#,
                params![
                    learner_id,
                    verse_id,
                    session_id,
                    state.easiness_factor,
                    state.interval,
                    state.repetitions,
                    today.to_string(),
                    state.difficulty,
                    state.is_memorized,
                    now,
                ],
            )?;
            if inserted == 0 {
                return Err(Error::conflict(format!(
                    "verse {} is already being studied",
                    verse_id
                )));
            }

            tx.commit()?;
        }

        // Summary is derived data; a failed recompute never undoes the start.
        if let Err(e) = self.recompute_progress(learner_id, today) {
            warn!(learner_id, error = %e, "progress recompute after start failed");
        }

        self.get_study(learner_id, verse_id)?
            .ok_or_else(|| Error::not_found(format!("study for verse {}", verse_id)))
    }

    /// Records a review and reschedules the verse. The read-modify-write of
    /// the study row runs in one immediate transaction, so two reviews of
    /// the same (learner, verse) can never both apply against the same
    /// prior state.
    pub fn record_review(
        &mut self,
        learner_id: i64,
        verse_id: i64,
        quality: i32,
        today: NaiveDate,
    ) -> Result<VerseStudy> {
        let now = Utc::now().to_rfc3339();
        let session_id = self.open_session(learner_id)?.map(|s| s.id);

        let updated = {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;

            let study = Self::query_study(&tx, learner_id, verse_id)?
                .ok_or_else(|| Error::not_found(format!("study for verse {}", verse_id)))?;

            let state = Sm2State {
                easiness_factor: study.easiness_factor,
                interval: study.interval,
                repetitions: study.repetitions,
                difficulty: study.difficulty,
                is_memorized: study.is_memorized,
            }
            .review(quality);
            let next_review_date = state.next_review_date(today);

            tx.execute(
                r#"
                UPDATE verse_studies
                SET easiness_factor = ?1,
                    interval = ?2,
                    repetitions = ?3,
                    next_review_date = ?4,
                    difficulty = ?5,
                    is_memorized = ?6,
                    last_studied_at = ?7
                WHERE id = ?8
                "#,
                params![
                    state.easiness_factor,
                    state.interval,
                    state.repetitions,
                    next_review_date.to_string(),
                    state.difficulty,
                    state.is_memorized,
                    now,
                    study.id,
                ],
            )?;

            tx.commit()?;

            VerseStudy {
                easiness_factor: state.easiness_factor,
                interval: state.interval,
                repetitions: state.repetitions,
                next_review_date,
                difficulty: state.difficulty,
                is_memorized: state.is_memorized,
                last_studied_at: now.clone(),
                ..study
            }
        };

        // Attribution is informational; a failed log write must not undo
        // or fail the review itself.
        if let Err(e) = self.conn.execute(
            "INSERT INTO review_log (learner_id, verse_id, session_id, quality, reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![learner_id, verse_id, session_id, quality, now],
        ) {
            warn!(learner_id, verse_id, error = %e, "review attribution write failed");
        }

        if let Err(e) = self.recompute_progress(learner_id, today) {
            warn!(learner_id, error = %e, "progress recompute after review failed");
        }

        Ok(updated)
    }

    /// Bulk-starts every verse of a surah that the learner is not already
    /// tracking. Inserts run in batches so no single transaction grows with
    /// the surah; the unique index makes overlap with individual starts
    /// count as already-present.
    pub fn add_surah_to_study(
        &mut self,
        learner_id: i64,
        surah_number: u32,
        session_id: Option<i64>,
        today: NaiveDate,
    ) -> Result<AddSurahResult> {
        let surah = self
            .get_surah(surah_number)?
            .ok_or_else(|| Error::not_found(format!("surah {}", surah_number)))?;

        let verse_ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM verses WHERE surah_id = ?1 ORDER BY verse_number")?;
            let rows = stmt.query_map(params![surah.id], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let state = Sm2State::new();
        let now = Utc::now().to_rfc3339();
        let mut added = 0u32;

        for chunk in verse_ids.chunks(BULK_BATCH_SIZE) {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;
            {
                let mut stmt = tx.prepare(
                    r#"
                    INSERT OR IGNORE INTO verse_studies
                        (learner_id, verse_id, session_id, easiness_factor, interval, repetitions,
                         next_review_date, difficulty, is_memorized, first_studied_at, last_studied_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
                    "#,
                )?;
                for verse_id in chunk {
                    added += stmt.execute(params![
                        learner_id,
                        verse_id,
                        session_id,
                        state.easiness_factor,
                        state.interval,
                        state.repetitions,
                        today.to_string(),
                        state.difficulty,
                        state.is_memorized,
                        now,
                    ])? as u32;
                }
            }
            tx.commit()?;
        }

        let total = verse_ids.len() as u32;

        if added > 0 {
            if let Err(e) = self.recompute_progress(learner_id, today) {
                warn!(learner_id, error = %e, "progress recompute after bulk add failed");
            }
        }

        Ok(AddSurahResult {
            added,
            already_present: total - added,
            total,
        })
    }

    // Queue operations

    /// Verses due on or before `as_of`, most overdue first. Ties are broken
    /// by canonical verse order so the queue is stable.
    pub fn due_studies(&self, learner_id: i64, as_of: NaiveDate) -> Result<Vec<StudiedVerse>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT v.id, v.surah_id, s.number, v.verse_number,
                   vs.id, vs.learner_id, vs.verse_id, vs.session_id, vs.easiness_factor,
                   vs.interval, vs.repetitions, vs.next_review_date, vs.difficulty,
                   vs.is_memorized, vs.first_studied_at, vs.last_studied_at
            FROM verse_studies vs
            JOIN verses v ON vs.verse_id = v.id
            JOIN surahs s ON v.surah_id = s.id
            WHERE vs.learner_id = ?1 AND vs.next_review_date <= ?2
            ORDER BY vs.next_review_date ASC, s.number ASC, v.verse_number ASC
            "#,
        )?;

        let rows = stmt.query_map(params![learner_id, as_of.to_string()], |row| {
            Ok(StudiedVerse {
                verse: Self::map_verse(row)?,
                study: Self::map_study_at(row, 4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Verses the learner has never studied, in canonical order, capped at
    /// `limit`.
    pub fn new_verses(&self, learner_id: i64, limit: u32) -> Result<Vec<Verse>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT v.id, v.surah_id, s.number, v.verse_number
            FROM verses v
            JOIN surahs s ON v.surah_id = s.id
            WHERE v.id NOT IN (SELECT verse_id FROM verse_studies WHERE learner_id = ?1)
            ORDER BY s.number ASC, v.verse_number ASC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![learner_id, limit], Self::map_verse)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The day's workload: every due verse, topped up with new verses when
    /// the due queue falls short of the daily goal. The due set is never
    /// truncated to fit the goal.
    pub fn daily_plan(
        &self,
        learner_id: i64,
        daily_goal: u32,
        as_of: NaiveDate,
    ) -> Result<DailyPlan> {
        let due = self.due_studies(learner_id, as_of)?;
        let new_verses = if (due.len() as u32) < daily_goal {
            self.new_verses(learner_id, daily_goal - due.len() as u32)?
        } else {
            Vec::new()
        };
        let total = due.len() + new_verses.len();
        Ok(DailyPlan {
            due,
            new_verses,
            total,
        })
    }

    // Session operations

    pub fn open_session(&self, learner_id: i64) -> Result<Option<StudySession>> {
        Self::query_open_session(&self.conn, learner_id)
    }

    /// Opens a study session. At most one session per learner may be open;
    /// the check runs under the write transaction.
    pub fn start_session(&mut self, learner_id: i64) -> Result<StudySession> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if Self::query_open_session(&tx, learner_id)?.is_some() {
            return Err(Error::conflict("a study session is already open"));
        }

        let start_time = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO study_sessions (learner_id, start_time) VALUES (?1, ?2)",
            params![learner_id, start_time],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(StudySession {
            id,
            learner_id,
            start_time,
            end_time: None,
            verses_studied: 0,
        })
    }

    /// Closes the learner's open session, snapshotting the number of
    /// reviews attributed to it.
    pub fn end_session(&mut self, learner_id: i64, today: NaiveDate) -> Result<StudySession> {
        let session = {
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut session = Self::query_open_session(&tx, learner_id)?
                .ok_or_else(|| Error::not_found("open study session"))?;

            let verses_studied: u32 = tx.query_row(
                "SELECT COUNT(*) FROM review_log WHERE session_id = ?1",
                params![session.id],
                |row| row.get(0),
            )?;

            let end_time = Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE study_sessions SET end_time = ?1, verses_studied = ?2 WHERE id = ?3",
                params![end_time, verses_studied, session.id],
            )?;
            tx.commit()?;

            session.end_time = Some(end_time);
            session.verses_studied = verses_studied;
            session
        };

        if let Err(e) = self.recompute_progress(learner_id, today) {
            warn!(learner_id, error = %e, "progress recompute after session close failed");
        }

        Ok(session)
    }

    pub fn list_sessions(&self, learner_id: i64) -> Result<Vec<StudySession>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, learner_id, start_time, end_time, verses_studied
            FROM study_sessions
            WHERE learner_id = ?1
            ORDER BY start_time DESC
            "#,
        )?;
        let rows = stmt.query_map(params![learner_id], Self::map_session)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // Progress operations

    pub fn get_progress(&self, learner_id: i64) -> Result<Option<StudyProgress>> {
        Self::query_progress(&self.conn, learner_id)
    }

    /// Rebuilds the learner's progress summary from study and session
    /// history. Totals are pure recounts; the streak advances only when the
    /// calendar day changed, so calling this twice on the same day is a
    /// no-op for streaks.
    pub fn recompute_progress(&mut self, learner_id: i64, today: NaiveDate) -> Result<StudyProgress> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut progress = Self::query_progress(&tx, learner_id)?
            .unwrap_or_else(|| StudyProgress::empty(learner_id));

        progress.total_verses_studied = tx.query_row(
            "SELECT COUNT(*) FROM verse_studies WHERE learner_id = ?1",
            params![learner_id],
            |row| row.get(0),
        )?;
        progress.total_verses_memorized = tx.query_row(
            "SELECT COUNT(*) FROM verse_studies WHERE learner_id = ?1 AND is_memorized = 1",
            params![learner_id],
            |row| row.get(0),
        )?;

        let closed: Vec<StudySession> = {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, learner_id, start_time, end_time, verses_studied
                FROM study_sessions
                WHERE learner_id = ?1 AND end_time IS NOT NULL
                "#,
            )?;
            let rows = stmt.query_map(params![learner_id], Self::map_session)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        progress.total_study_minutes = closed
            .iter()
            .filter_map(|s| s.duration_minutes())
            .sum::<i64>() as u32;

        match progress.last_study_date {
            Some(last) => {
                let days_since = (today - last).num_days();
                if days_since == 1 {
                    progress.current_streak += 1;
                } else if days_since > 1 {
                    progress.current_streak = 1;
                }
                // days_since <= 0: today is already counted
            }
            None => {
                progress.current_streak = 1;
            }
        }
        progress.longest_streak = progress.longest_streak.max(progress.current_streak);
        progress.last_study_date = Some(today);

        tx.execute(
            r#"
            INSERT INTO study_progress
                (learner_id, total_verses_studied, total_verses_memorized,
                 total_study_minutes, current_streak, longest_streak, last_study_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(learner_id) DO UPDATE SET
                total_verses_studied = excluded.total_verses_studied,
                total_verses_memorized = excluded.total_verses_memorized,
                total_study_minutes = excluded.total_study_minutes,
                current_streak = excluded.current_streak,
                longest_streak = excluded.longest_streak,
                last_study_date = excluded.last_study_date
            "#,
            params![
                learner_id,
                progress.total_verses_studied,
                progress.total_verses_memorized,
                progress.total_study_minutes,
                progress.current_streak,
                progress.longest_streak,
                progress.last_study_date.map(|d| d.to_string()),
            ],
        )?;
        tx.commit()?;

        Ok(progress)
    }

    // Statistics

    pub fn statistics(&self, learner_id: i64, today: NaiveDate) -> Result<Statistics> {
        let progress = self
            .get_progress(learner_id)?
            .unwrap_or_else(|| StudyProgress::empty(learner_id));

        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
        let next_week = today.checked_add_days(Days::new(7)).unwrap_or(today);

        let due_today: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM verse_studies WHERE learner_id = ?1 AND next_review_date <= ?2",
            params![learner_id, today.to_string()],
            |row| row.get(0),
        )?;
        let due_tomorrow: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM verse_studies WHERE learner_id = ?1 AND next_review_date = ?2",
            params![learner_id, tomorrow.to_string()],
            |row| row.get(0),
        )?;
        let due_next_week: u32 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM verse_studies
            WHERE learner_id = ?1 AND next_review_date > ?2 AND next_review_date <= ?3
            "#,
            params![learner_id, today.to_string(), next_week.to_string()],
            |row| row.get(0),
        )?;

        let mut histogram = DifficultyHistogram::default();
        {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT difficulty, COUNT(*)
                FROM verse_studies
                WHERE learner_id = ?1
                GROUP BY difficulty
                "#,
            )?;
            let rows = stmt.query_map(params![learner_id], |row| {
                Ok((row.get::<_, u8>(0)?, row.get::<_, u32>(1)?))
            })?;
            for row in rows {
                let (difficulty, count) = row?;
                match difficulty {
                    1 => histogram.very_easy = count,
                    2 => histogram.easy = count,
                    3 => histogram.medium = count,
                    4 => histogram.hard = count,
                    5 => histogram.very_hard = count,
                    _ => {}
                }
            }
        }

        let studied_surah_count: u32 = self.conn.query_row(
            r#"
            SELECT COUNT(DISTINCT v.surah_id)
            FROM verse_studies vs
            JOIN verses v ON vs.verse_id = v.id
            WHERE vs.learner_id = ?1
            "#,
            params![learner_id],
            |row| row.get(0),
        )?;

        Ok(Statistics {
            progress,
            due_today,
            due_tomorrow,
            due_next_week,
            difficulty_distribution: histogram,
            studied_surah_count,
        })
    }

    // Row mapping helpers

    fn map_surah(row: &rusqlite::Row<'_>) -> rusqlite::Result<Surah> {
        Ok(Surah {
            id: row.get(0)?,
            number: row.get(1)?,
            name: row.get(2)?,
            verse_count: row.get(3)?,
        })
    }

    fn map_verse(row: &rusqlite::Row<'_>) -> rusqlite::Result<Verse> {
        Ok(Verse {
            id: row.get(0)?,
            surah_id: row.get(1)?,
            surah_number: row.get(2)?,
            verse_number: row.get(3)?,
        })
    }

    fn map_learner(row: &rusqlite::Row<'_>) -> rusqlite::Result<Learner> {
        Ok(Learner {
            id: row.get(0)?,
            name: row.get(1)?,
            daily_goal: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudySession> {
        Ok(StudySession {
            id: row.get(0)?,
            learner_id: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            verses_studied: row.get(4)?,
        })
    }

    fn map_study_at(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<VerseStudy> {
        Ok(VerseStudy {
            id: row.get(base)?,
            learner_id: row.get(base + 1)?,
            verse_id: row.get(base + 2)?,
            session_id: row.get(base + 3)?,
            easiness_factor: row.get(base + 4)?,
            interval: row.get(base + 5)?,
            repetitions: row.get(base + 6)?,
            next_review_date: parse_date(row, base + 7)?,
            difficulty: row.get(base + 8)?,
            is_memorized: row.get(base + 9)?,
            first_studied_at: row.get(base + 10)?,
            last_studied_at: row.get(base + 11)?,
        })
    }

    fn query_study(
        conn: &Connection,
        learner_id: i64,
        verse_id: i64,
    ) -> Result<Option<VerseStudy>> {
        let study = conn
            .query_row(
                r#"
                SELECT id, learner_id, verse_id, session_id, easiness_factor, interval,
                       repetitions, next_review_date, difficulty, is_memorized,
                       first_studied_at, last_studied_at
                FROM verse_studies
                WHERE learner_id = ?1 AND verse_id = ?2
                "#,
                params![learner_id, verse_id],
                |row| Self::map_study_at(row, 0),
            )
            .optional()?;
        Ok(study)
    }

    fn query_open_session(conn: &Connection, learner_id: i64) -> Result<Option<StudySession>> {
        let session = conn
            .query_row(
                r#"
                SELECT id, learner_id, start_time, end_time, verses_studied
                FROM study_sessions
                WHERE learner_id = ?1 AND end_time IS NULL
                ORDER BY start_time DESC
                LIMIT 1
                "#,
                params![learner_id],
                Self::map_session,
            )
            .optional()?;
        Ok(session)
    }

    fn query_progress(conn: &Connection, learner_id: i64) -> Result<Option<StudyProgress>> {
        let progress = conn
            .query_row(
                r#"
                SELECT learner_id, total_verses_studied, total_verses_memorized,
                       total_study_minutes, current_streak, longest_streak, last_study_date
                FROM study_progress
                WHERE learner_id = ?1
                "#,
                params![learner_id],
                |row| {
                    let last: Option<String> = row.get(6)?;
                    let last_study_date = match last {
                        Some(s) => Some(parse_date_str(&s, 6)?),
                        None => None,
                    };
                    Ok(StudyProgress {
                        learner_id: row.get(0)?,
                        total_verses_studied: row.get(1)?,
                        total_verses_memorized: row.get(2)?,
                        total_study_minutes: row.get(3)?,
                        current_streak: row.get(4)?,
                        longest_streak: row.get(5)?,
                        last_study_date,
                    })
                },
            )
            .optional()?;
        Ok(progress)
    }
}

fn parse_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    parse_date_str(&s, idx)
}

fn parse_date_str(s: &str, idx: usize) -> rusqlite::Result<NaiveDate> {
    s.parse::<NaiveDate>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
