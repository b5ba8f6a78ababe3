//! SQLite schema for coverage stores.
//!
//! Definition tables are keyed by a `definition` id, record tables by a
//! `run` id. Points and point hits also carry their preorder `position`,
//! which is the order rows are read back in; `(start, depth)` alone can tie
//! when a group holds no points.

/// Every table, created on open.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS definition (
    definition INTEGER PRIMARY KEY AUTOINCREMENT,
    sha TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS run (
    run INTEGER PRIMARY KEY AUTOINCREMENT,
    definition INTEGER NOT NULL REFERENCES definition(definition),
    sha TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT '',
    source_key TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS point (
    definition INTEGER NOT NULL,
    position INTEGER NOT NULL,
    start INTEGER NOT NULL,
    depth INTEGER NOT NULL,
    "end" INTEGER NOT NULL,
    axis_start INTEGER NOT NULL,
    axis_end INTEGER NOT NULL,
    axis_value_start INTEGER NOT NULL,
    axis_value_end INTEGER NOT NULL,
    goal_start INTEGER NOT NULL,
    goal_end INTEGER NOT NULL,
    bucket_start INTEGER NOT NULL,
    bucket_end INTEGER NOT NULL,
    target INTEGER NOT NULL,
    target_buckets INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    PRIMARY KEY (definition, position)
);
CREATE TABLE IF NOT EXISTS axis (
    definition INTEGER NOT NULL,
    start INTEGER NOT NULL,
    value_start INTEGER NOT NULL,
    value_end INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    PRIMARY KEY (definition, start)
);
CREATE TABLE IF NOT EXISTS axis_value (
    definition INTEGER NOT NULL,
    start INTEGER NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (definition, start)
);
CREATE TABLE IF NOT EXISTS goal (
    definition INTEGER NOT NULL,
    start INTEGER NOT NULL,
    target INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    PRIMARY KEY (definition, start)
);
CREATE TABLE IF NOT EXISTS bucket_goal (
    definition INTEGER NOT NULL,
    start INTEGER NOT NULL,
    goal INTEGER NOT NULL,
    PRIMARY KEY (definition, start)
);
CREATE TABLE IF NOT EXISTS point_hit (
    run INTEGER NOT NULL,
    position INTEGER NOT NULL,
    start INTEGER NOT NULL,
    depth INTEGER NOT NULL,
    hits INTEGER NOT NULL,
    hit_buckets INTEGER NOT NULL,
    full_buckets INTEGER NOT NULL,
    PRIMARY KEY (run, position)
);
CREATE TABLE IF NOT EXISTS bucket_hit (
    run INTEGER NOT NULL,
    start INTEGER NOT NULL,
    hits INTEGER NOT NULL,
    PRIMARY KEY (run, start)
);
"#;

/// Definition tables copied verbatim when merging, with their non-key columns.
pub const DEFINITION_TABLES: &[(&str, &str)] = &[
    (
        "point",
        r#"position, start, depth, "end", axis_start, axis_end, axis_value_start, axis_value_end, goal_start, goal_end, bucket_start, bucket_end, target, target_buckets, name, description"#,
    ),
    ("axis", "start, value_start, value_end, name, description"),
    ("axis_value", "start, value"),
    ("goal", "start, target, name, description"),
    ("bucket_goal", "start, goal"),
];
