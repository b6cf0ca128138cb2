use crate::cli::ConvertArgs;
use crate::commands::check_format;
use crate::exit_codes;
use crate::output;
use jazlab_nwb::session_to_nwb;
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
struct ConvertOutput {
    dataset: String,
    subject: String,
    session: String,
    stub_test: bool,
    files: Vec<String>,
    elapsed_secs: f64,
}

pub fn execute(args: ConvertArgs) -> i32 {
    let config = match args.config.to_config() {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    if let Err(msg) = check_format(&args.format) {
        eprintln!("Error: {}", msg);
        return exit_codes::INPUT_ERROR;
    }

    let request = args.request();
    let start = Instant::now();
    let files = match session_to_nwb(&request, &config) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    let result = ConvertOutput {
        dataset: request.dataset.to_string(),
        subject: request.subject.clone(),
        session: request.session.clone(),
        stub_test: config.stub_test,
        files: files.iter().map(|f| f.display().to_string()).collect(),
        elapsed_secs: start.elapsed().as_secs_f64(),
    };

    if args.json {
        return output::print_json(&result, false);
    }

    for file in &result.files {
        println!("Wrote {}", file);
    }
    eprintln!(
        "Converted {} session {}/{} in {:.1}s",
        result.dataset, result.subject, result.session, result.elapsed_secs
    );
    exit_codes::SUCCESS
}
