/// Tables are created idempotently on every open.
///
/// `faces.phash` holds the u64 dHash bit-cast to i64. `faces.embedding` is a
/// little-endian f32 array.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    display_name TEXT NOT NULL UNIQUE,
    is_nsfw      INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS people (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    category_id        INTEGER NOT NULL REFERENCES categories(id),
    display_name       TEXT NOT NULL,
    disambiguation_tag TEXT NOT NULL DEFAULT '',
    is_hidden          INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    UNIQUE (category_id, display_name, disambiguation_tag)
);

CREATE TABLE IF NOT EXISTS faces (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    category_id INTEGER NOT NULL REFERENCES categories(id),
    person_id   INTEGER NOT NULL REFERENCES people(id),
    phash       INTEGER NOT NULL UNIQUE,
    embedding   BLOB NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_faces_category ON faces(category_id);
CREATE INDEX IF NOT EXISTS idx_faces_person ON faces(person_id);
CREATE INDEX IF NOT EXISTS idx_people_name ON people(display_name);
"#;
