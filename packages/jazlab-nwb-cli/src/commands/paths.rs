use crate::cli::PathsArgs;
use crate::exit_codes;
use crate::output;

pub fn execute(args: PathsArgs) -> i32 {
    let config = match args.config.to_config() {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let session = &args.session;
    let paths = match session
        .dataset
        .session_paths(&config, &session.subject, &session.session)
    {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::for_error(&e);
        }
    };

    if args.json {
        return output::print_json(&paths, false);
    }

    println!("{} {}/{} ({})", session.dataset, session.subject, session.session, config.repo.as_str());
    println!("  output:         {}", paths.output.display());
    println!("  raw data:       {}", paths.raw_data.display());
    println!("  task behavior:  {}", paths.task_behavior.display());
    println!("  sync pulses:    {}", paths.sync_pulses.display());
    println!("  spike sorting:  {}", paths.spike_sorting.display());
    if let Some(ref path) = paths.probe_metadata {
        println!("  probe metadata: {}", path.display());
    }
    if let Some(ref path) = paths.postprocessed {
        println!("  postprocessed:  {}", path.display());
    }
    exit_codes::SUCCESS
}
