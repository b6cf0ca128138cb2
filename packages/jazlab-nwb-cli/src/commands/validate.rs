use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::output;
use jazlab_nwb::NwbWriter;
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    file: String,
    valid: bool,
    nodes: usize,
    problems: Vec<String>,
    error: Option<String>,
}

pub fn execute(args: ValidateArgs) -> i32 {
    let file = args.file.display().to_string();

    let (result, code) = match NwbWriter::inspect(&args.file) {
        Ok(manifest) => {
            let problems = manifest.validate();
            let code = if problems.is_empty() {
                exit_codes::SUCCESS
            } else {
                exit_codes::INPUT_ERROR
            };
            (
                ValidateOutput {
                    file: file.clone(),
                    valid: problems.is_empty(),
                    nodes: manifest.nodes.len(),
                    problems,
                    error: None,
                },
                code,
            )
        }
        Err(e) => (
            ValidateOutput {
                file: file.clone(),
                valid: false,
                nodes: 0,
                problems: Vec::new(),
                error: Some(e.to_string()),
            },
            exit_codes::for_error(&e),
        ),
    };

    if args.json {
        let printed = output::print_json(&result, false);
        return if printed == exit_codes::SUCCESS { code } else { printed };
    }

    if let Some(ref err) = result.error {
        eprintln!("Error: {}", err);
    } else if result.valid {
        println!("File '{}' is valid ({} objects)", file, result.nodes);
    } else {
        eprintln!("File '{}' has {} problem(s):", file, result.problems.len());
        for problem in &result.problems {
            eprintln!("  {}", problem);
        }
    }
    code
}
