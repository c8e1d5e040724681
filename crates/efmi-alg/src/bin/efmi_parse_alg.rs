use std::{env, fs};

use efmi_alg::build_algorithm_code;

fn main() {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: efmi_parse_alg <file.alg>");
        std::process::exit(2);
    };
    if args.next().is_some() {
        eprintln!("usage: efmi_parse_alg <file.alg>");
        std::process::exit(2);
    }

    let text = match fs::read_to_string(&path) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("failed to read `{path}`: {err}");
            std::process::exit(2);
        }
    };

    match build_algorithm_code(&text) {
        Ok(module) => {
            println!(
                "ok(alg): block={} variables={} protected={} functions={} bindings={} issues={}",
                module.name,
                module.block_variables.len(),
                module.protected_variables.len(),
                module.functions.len(),
                module.binding_count(),
                module.issues.len()
            );
        }
        Err(err) => {
            eprintln!("{path}: {err}");
            std::process::exit(1);
        }
    }
}
