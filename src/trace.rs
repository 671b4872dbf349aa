//! Diagnostic tracing for the pipeline, gated by the `SIFT_TRACE`
//! environment variable. `SIFT_TRACE=1` traces every stage;
//! `SIFT_TRACE=compile,vm` narrows it to the named ones. The stages
//! are `lex`, `parse`, `compile`, `optimize` and `vm`.

use std::sync::OnceLock;

/// One flag per pipeline stage, resolved from the environment once.
#[derive(Clone, Copy, Default)]
struct Stages {
    lex: bool,
    parse: bool,
    compile: bool,
    optimize: bool,
    vm: bool,
}

static STAGES: OnceLock<Stages> = OnceLock::new();

fn stages() -> Stages {
    *STAGES.get_or_init(|| {
        let spec = std::env::var("SIFT_TRACE").unwrap_or_default();
        if spec == "1" {
            return Stages {
                lex: true,
                parse: true,
                compile: true,
                optimize: true,
                vm: true,
            };
        }
        let mut on = Stages::default();
        for name in spec.split(',') {
            match name.trim() {
                "lex" => on.lex = true,
                "parse" => on.parse = true,
                "compile" => on.compile = true,
                "optimize" => on.optimize = true,
                "vm" => on.vm = true,
                _ => {}
            }
        }
        on
    })
}

pub(crate) fn is_enabled(stage: &str) -> bool {
    let on = stages();
    match stage {
        "lex" => on.lex,
        "parse" => on.parse,
        "compile" => on.compile,
        "optimize" => on.optimize,
        "vm" => on.vm,
        _ => false,
    }
}

macro_rules! trace_log {
    ($stage:expr, $($arg:tt)*) => {
        if $crate::trace::is_enabled($stage) {
            eprintln!("sift:{}: {}", $stage, format_args!($($arg)*));
        }
    };
}
pub(crate) use trace_log;
