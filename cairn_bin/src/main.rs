//! The interactive shell for CairnDB.
//!
//! Loads the YAML config, recovers the database, and reads SQL statements
//! from stdin until `exit`.

use std::io::{self, BufRead, Write};

use cairn_bin::executor;
use cairn_bin::session::Session;
use cairn_bin::{Config, Db};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("CAIRN_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load(&config_path)?;
    let db = Db::open(&config)?;
    println!(
        "CairnDB ready ({}). Type SQL, or `exit` to quit.",
        config.db_file.display()
    );

    let mut session = Session::new("shell");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("cairn> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("exit") {
            break;
        }
        match executor::parse_and_execute(query, &db, &mut session) {
            Ok(result) => println!("{result}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    db.close()?;
    Ok(())
}
