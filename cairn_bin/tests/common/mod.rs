use std::path::Path;
use std::time::Duration;

use cairn_bin::{Config, Db};

/// Opens a database rooted in `dir` with a short flush cadence.
pub fn open_db(dir: &Path) -> Db {
    let config = Config {
        degree: 3,
        db_file: dir.join("test.db"),
        log_file: dir.join("test.wal"),
        flush_every: Duration::from_millis(100),
        ..Config::default()
    };
    Db::open(&config).expect("open database")
}
