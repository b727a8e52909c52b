//! Writes a fresh random HS256 secret file.
//!
//! Usage: `keygen <path> [length]`

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs::OpenOptions;
use std::io::Write;
use std::process::ExitCode;

use tokenkeeper::auth::MIN_HMAC_SECRET_LEN;

const DEFAULT_LENGTH: usize = 64;

fn generate_secret(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn write_secret(path: &str, secret: &str) -> std::io::Result<()> {
    // create_new refuses to clobber an existing key
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(secret.as_bytes())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let path = match args.get(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: keygen <path> [length]");
            return ExitCode::from(2);
        }
    };

    let length = match args.get(2).map(|s| s.parse::<usize>()) {
        None => DEFAULT_LENGTH,
        Some(Ok(n)) if n >= MIN_HMAC_SECRET_LEN => n,
        Some(_) => {
            eprintln!("length must be a number of at least {}", MIN_HMAC_SECRET_LEN);
            return ExitCode::from(2);
        }
    };

    match write_secret(path, &generate_secret(length)) {
        Ok(()) => {
            println!("wrote {}-character secret to {}", length, path);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("cannot write {}: {}", path, e);
            ExitCode::FAILURE
        }
    }
}
