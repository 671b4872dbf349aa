use std::env;
use std::fs;
use std::process;

use sift::{Engine, PrepareFlag, Value};

fn usage() -> ! {
    eprintln!("usage: sift [--bytecode] [--no-optimize] SCRIPT [JSON]");
    process::exit(2);
}

fn main() {
    let mut show_bytecode = false;
    let mut flags = Vec::new();
    let mut paths = Vec::new();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--bytecode" => show_bytecode = true,
            "--no-optimize" => flags.push(PrepareFlag::NoOptimize),
            other if other.starts_with("--") => usage(),
            _ => paths.push(arg),
        }
    }
    if paths.is_empty() || paths.len() > 2 {
        usage();
    }

    let script = fs::read_to_string(&paths[0]).unwrap_or_else(|err| {
        eprintln!("failed to read {}: {}", paths[0], err);
        process::exit(1);
    });

    let mut engine = Engine::new(script);
    if let Err(err) = engine.prepare(&flags) {
        eprintln!("error compiling {}: {}", paths[0], err);
        process::exit(1);
    }

    if show_bytecode {
        match engine.dump() {
            Ok(text) => print!("{}", text),
            Err(err) => {
                eprintln!("failed to dump bytecode: {}", err);
                process::exit(1);
            }
        }
        return;
    }

    // The optional JSON document becomes the host object.
    let host = match paths.get(1) {
        Some(path) => {
            let text = fs::read_to_string(path).unwrap_or_else(|err| {
                eprintln!("failed to read {}: {}", path, err);
                process::exit(1);
            });
            let doc: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|err| {
                eprintln!("invalid JSON in {}: {}", path, err);
                process::exit(1);
            });
            Value::from_json(&doc)
        }
        None => Value::Null,
    };

    match engine.execute(&host) {
        Ok(result) => println!("{}", result.inspect()),
        Err(err) => {
            eprintln!("runtime error: {}", err);
            process::exit(1);
        }
    }
}
