use crate::cli::BatchArgs;
use crate::commands::check_format;
use crate::exit_codes;
use crate::output;
use jazlab_nwb::{session_to_nwb, ConversionConfig, SessionRequest};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Serialize)]
struct SessionOutcome {
    dataset: String,
    subject: String,
    session: String,
    files: Vec<String>,
    error: Option<String>,
}

pub fn execute(args: BatchArgs) -> i32 {
    let requests = match resolve_requests(&args) {
        Ok(r) => r,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    if requests.is_empty() {
        eprintln!("Error: No sessions to convert");
        return exit_codes::INPUT_ERROR;
    }

    for request in &requests {
        if let Err(msg) = check_format(&request.extension) {
            eprintln!("Error: {}/{}: {}", request.subject, request.session, msg);
            return exit_codes::INPUT_ERROR;
        }
    }

    // Dry-run mode: print session list and exit
    if args.dry_run {
        for r in &requests {
            println!("{} {} {}", r.dataset, r.subject, r.session);
        }
        if !args.quiet {
            eprintln!("Found {} session(s)", requests.len());
        }
        return exit_codes::SUCCESS;
    }

    let config = match args.config.to_config() {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = args.jobs {
        builder = builder.num_threads(jobs);
    }
    let pool = match builder.build() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: Failed to start worker pool: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    let total = requests.len();
    let started = AtomicUsize::new(0);
    let start_time = Instant::now();

    let outcomes: Vec<SessionOutcome> = pool.install(|| {
        requests
            .par_iter()
            .map(|request| {
                if !args.quiet {
                    let i = started.fetch_add(1, Ordering::SeqCst) + 1;
                    eprintln!("[{}/{}] {} {}...", i, total, request.subject, request.session);
                }
                convert(request, &config)
            })
            .collect()
    });

    let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
    let succeeded = total - failed;

    for outcome in &outcomes {
        if let Some(ref err) = outcome.error {
            eprintln!("  {}/{} failed: {}", outcome.subject, outcome.session, err);
        }
        let printed = output::print_json(outcome, args.compact);
        if printed != exit_codes::SUCCESS {
            return printed;
        }
    }

    if !args.quiet {
        eprintln!(
            "Batch complete: {}/{} succeeded, {}/{} failed, {:.1}s",
            succeeded,
            total,
            failed,
            total,
            start_time.elapsed().as_secs_f64()
        );
    }

    if failed == 0 {
        exit_codes::SUCCESS
    } else if succeeded > 0 {
        exit_codes::PARTIAL_FAILURE
    } else {
        exit_codes::EXECUTION_ERROR
    }
}

fn convert(request: &SessionRequest, config: &ConversionConfig) -> SessionOutcome {
    let result = session_to_nwb(request, config);
    let (files, error) = match result {
        Ok(files) => (files.iter().map(|f| f.display().to_string()).collect(), None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    SessionOutcome {
        dataset: request.dataset.to_string(),
        subject: request.subject.clone(),
        session: request.session.clone(),
        files,
        error,
    }
}

fn resolve_requests(args: &BatchArgs) -> Result<Vec<SessionRequest>, String> {
    if let Some(ref path) = args.requests {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read requests file '{}': {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("Invalid requests file '{}': {}", path.display(), e))
    } else if let (Some(dataset), Some(subject), Some(sessions)) = (args.dataset, &args.subject, &args.sessions) {
        Ok(sessions
            .iter()
            .map(|session| SessionRequest::new(dataset, subject, session).with_extension(&args.format))
            .collect())
    } else {
        Err("Either --requests or --dataset, --subject and --sessions must be specified".to_string())
    }
}
