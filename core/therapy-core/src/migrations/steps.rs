//! The shipped schema history.
//!
//! Append new steps at the end with a version that sorts after the last one.
//! Never edit a step that has shipped; databases in the field already have it
//! recorded in their ledger.

use super::MigrationStep;

pub const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        version: "001_create_base_tables",
        description: "Create base tables for children, sessions, activities",
        up: BASE_TABLES_UP,
        down: BASE_TABLES_DOWN,
    },
    MigrationStep {
        version: "002_create_notes_and_templates",
        description: "Create notes and note templates tables",
        up: NOTES_UP,
        down: NOTES_DOWN,
    },
    MigrationStep {
        version: "003_create_rewards_and_goals",
        description: "Create rewards and goals tables",
        up: REWARDS_UP,
        down: REWARDS_DOWN,
    },
    MigrationStep {
        version: "004_create_flashcards",
        description: "Create flashcards and session flashcards tables",
        up: FLASHCARDS_UP,
        down: FLASHCARDS_DOWN,
    },
    MigrationStep {
        version: "005_add_indexes_and_constraints",
        description: "Add lookup indexes for every table",
        up: INDEXES_UP,
        down: INDEXES_DOWN,
    },
    MigrationStep {
        version: "006_enforce_single_open_session",
        description: "Allow at most one open session per child",
        up: SINGLE_OPEN_SESSION_UP,
        down: SINGLE_OPEN_SESSION_DOWN,
    },
];

const BASE_TABLES_UP: &str = "
CREATE TABLE IF NOT EXISTS children (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    date_of_birth TEXT,
    gender TEXT NOT NULL DEFAULT '',
    guardian_name TEXT NOT NULL DEFAULT '',
    contact_info TEXT NOT NULL DEFAULT '',
    assessment_text TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    child_id INTEGER NOT NULL REFERENCES children(id),
    start_time TEXT NOT NULL,
    end_time TEXT,
    duration_minutes INTEGER NOT NULL DEFAULT 0,
    summary_text TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    default_duration_minutes INTEGER NOT NULL DEFAULT 0,
    category TEXT NOT NULL DEFAULT '',
    objectives TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS session_activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    activity_id INTEGER NOT NULL REFERENCES activities(id),
    start_time TEXT,
    end_time TEXT,
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
";

// Dependents before the tables they reference.
const BASE_TABLES_DOWN: &str = "
DROP TABLE IF EXISTS session_activities;
DROP TABLE IF EXISTS activities;
DROP TABLE IF EXISTS sessions;
DROP TABLE IF EXISTS children;
";

const NOTES_UP: &str = "
CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    note_text TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT '',
    timestamp TEXT NOT NULL,
    is_encrypted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS note_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    template_text TEXT NOT NULL UNIQUE,
    category_hint TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
";

const NOTES_DOWN: &str = "
DROP TABLE IF EXISTS notes;
DROP TABLE IF EXISTS note_templates;
";

const REWARDS_UP: &str = "
CREATE TABLE IF NOT EXISTS rewards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    child_id INTEGER NOT NULL REFERENCES children(id),
    session_id INTEGER REFERENCES sessions(id),
    reward_type TEXT NOT NULL,
    value INTEGER NOT NULL DEFAULT 1,
    timestamp TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS goals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    child_id INTEGER NOT NULL REFERENCES children(id),
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    target_value INTEGER NOT NULL DEFAULT 0,
    target_type TEXT NOT NULL DEFAULT '',
    start_date TEXT NOT NULL,
    end_date TEXT,
    is_achieved INTEGER NOT NULL DEFAULT 0,
    achieved_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
";

const REWARDS_DOWN: &str = "
DROP TABLE IF EXISTS rewards;
DROP TABLE IF EXISTS goals;
";

const FLASHCARDS_UP: &str = "
CREATE TABLE IF NOT EXISTS flashcards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    text_content TEXT NOT NULL DEFAULT '',
    image_path TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE TABLE IF NOT EXISTS session_flashcards (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    flashcard_id INTEGER NOT NULL REFERENCES flashcards(id),
    response_tag TEXT NOT NULL DEFAULT '',
    response_notes TEXT NOT NULL DEFAULT '',
    timestamp TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
";

const FLASHCARDS_DOWN: &str = "
DROP TABLE IF EXISTS session_flashcards;
DROP TABLE IF EXISTS flashcards;
";

const INDEXES_UP: &str = "
CREATE INDEX IF NOT EXISTS idx_children_name ON children(name);
CREATE INDEX IF NOT EXISTS idx_children_deleted_at ON children(deleted_at);
CREATE INDEX IF NOT EXISTS idx_sessions_child_id ON sessions(child_id);
CREATE INDEX IF NOT EXISTS idx_sessions_start_time ON sessions(start_time);
CREATE INDEX IF NOT EXISTS idx_sessions_deleted_at ON sessions(deleted_at);
CREATE INDEX IF NOT EXISTS idx_activities_name ON activities(name);
CREATE INDEX IF NOT EXISTS idx_activities_deleted_at ON activities(deleted_at);
CREATE INDEX IF NOT EXISTS idx_session_activities_session_id ON session_activities(session_id);
CREATE INDEX IF NOT EXISTS idx_session_activities_activity_id ON session_activities(activity_id);
CREATE INDEX IF NOT EXISTS idx_session_activities_deleted_at ON session_activities(deleted_at);
CREATE INDEX IF NOT EXISTS idx_notes_session_id ON notes(session_id);
CREATE INDEX IF NOT EXISTS idx_notes_timestamp ON notes(timestamp);
CREATE INDEX IF NOT EXISTS idx_notes_category ON notes(category);
CREATE INDEX IF NOT EXISTS idx_notes_deleted_at ON notes(deleted_at);
CREATE INDEX IF NOT EXISTS idx_rewards_child_id ON rewards(child_id);
CREATE INDEX IF NOT EXISTS idx_rewards_session_id ON rewards(session_id);
CREATE INDEX IF NOT EXISTS idx_rewards_timestamp ON rewards(timestamp);
CREATE INDEX IF NOT EXISTS idx_rewards_deleted_at ON rewards(deleted_at);
CREATE INDEX IF NOT EXISTS idx_goals_child_id ON goals(child_id);
CREATE INDEX IF NOT EXISTS idx_goals_start_date ON goals(start_date);
CREATE INDEX IF NOT EXISTS idx_goals_is_achieved ON goals(is_achieved);
CREATE INDEX IF NOT EXISTS idx_goals_deleted_at ON goals(deleted_at);
CREATE INDEX IF NOT EXISTS idx_flashcards_category ON flashcards(category);
CREATE INDEX IF NOT EXISTS idx_flashcards_deleted_at ON flashcards(deleted_at);
CREATE INDEX IF NOT EXISTS idx_session_flashcards_session_id ON session_flashcards(session_id);
CREATE INDEX IF NOT EXISTS idx_session_flashcards_flashcard_id ON session_flashcards(flashcard_id);
CREATE INDEX IF NOT EXISTS idx_session_flashcards_timestamp ON session_flashcards(timestamp);
CREATE INDEX IF NOT EXISTS idx_session_flashcards_deleted_at ON session_flashcards(deleted_at);
";

const INDEXES_DOWN: &str = "
DROP INDEX IF EXISTS idx_children_name;
DROP INDEX IF EXISTS idx_children_deleted_at;
DROP INDEX IF EXISTS idx_sessions_child_id;
DROP INDEX IF EXISTS idx_sessions_start_time;
DROP INDEX IF EXISTS idx_sessions_deleted_at;
DROP INDEX IF EXISTS idx_activities_name;
DROP INDEX IF EXISTS idx_activities_deleted_at;
DROP INDEX IF EXISTS idx_session_activities_session_id;
DROP INDEX IF EXISTS idx_session_activities_activity_id;
DROP INDEX IF EXISTS idx_session_activities_deleted_at;
DROP INDEX IF EXISTS idx_notes_session_id;
DROP INDEX IF EXISTS idx_notes_timestamp;
DROP INDEX IF EXISTS idx_notes_category;
DROP INDEX IF EXISTS idx_notes_deleted_at;
DROP INDEX IF EXISTS idx_rewards_child_id;
DROP INDEX IF EXISTS idx_rewards_session_id;
DROP INDEX IF EXISTS idx_rewards_timestamp;
DROP INDEX IF EXISTS idx_rewards_deleted_at;
DROP INDEX IF EXISTS idx_goals_child_id;
DROP INDEX IF EXISTS idx_goals_start_date;
DROP INDEX IF EXISTS idx_goals_is_achieved;
DROP INDEX IF EXISTS idx_goals_deleted_at;
DROP INDEX IF EXISTS idx_flashcards_category;
DROP INDEX IF EXISTS idx_flashcards_deleted_at;
DROP INDEX IF EXISTS idx_session_flashcards_session_id;
DROP INDEX IF EXISTS idx_session_flashcards_flashcard_id;
DROP INDEX IF EXISTS idx_session_flashcards_timestamp;
DROP INDEX IF EXISTS idx_session_flashcards_deleted_at;
";

const SINGLE_OPEN_SESSION_UP: &str = "
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_open_per_child
    ON sessions(child_id)
    WHERE end_time IS NULL AND deleted_at IS NULL;
";

const SINGLE_OPEN_SESSION_DOWN: &str = "
DROP INDEX IF EXISTS idx_sessions_one_open_per_child;
";
