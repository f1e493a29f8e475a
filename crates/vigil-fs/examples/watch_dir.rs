//! Watch a directory and print a line for every observed change.
//!
//! ```text
//! cargo run --example watch_dir -- ./some/dir "**/*.txt"
//! ```

use std::{env, io, sync::mpsc};

use vigil_fs::{FileProvider as _, PhysicalFileProvider};
use vigil_token::ChangeTokenExt as _;

fn main() -> io::Result<()> {
    let root = env::args().nth(1).unwrap_or_else(|| ".".into());
    let filter = env::args().nth(2).unwrap_or_else(|| "**".into());

    let provider = PhysicalFileProvider::new(&root)?;
    println!("watching `{filter}` under `{}`", provider.root().display());

    loop {
        // tokens are single-use, a new subscription is needed after every fire
        let token = provider.watch(&filter);
        if !token.active_callbacks() {
            eprintln!("invalid filter `{filter}`");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let _sub = token.on_change(move || {
            let _ = tx.send(());
        });
        if rx.recv().is_err() {
            return Ok(());
        }
        println!("change observed");
    }
}
